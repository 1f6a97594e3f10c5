//! In-memory page model: identified elements plus transient notifications

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};
use tokio::sync::watch;

/// A single page element
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub id: String,
    pub text: String,
    /// Form value for inputs
    pub value: String,
    pub classes: Vec<String>,
    pub width_percent: Option<f64>,
    pub disabled: bool,
    /// Cleared when the element is replaced in the document
    pub attached: bool,
}

impl Element {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            attached: true,
            ..Default::default()
        }
    }

    /// Reset the class list to `base` plus an optional modifier
    pub fn set_classes(&mut self, base: &str, modifier: Option<&str>) {
        self.classes = std::iter::once(base)
            .chain(modifier)
            .map(str::to_string)
            .collect();
    }

    pub fn replace_class(&mut self, from: &str, to: &str) {
        for class in self.classes.iter_mut().filter(|c| c.as_str() == from) {
            *class = to.to_string();
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn class_name(&self) -> String {
        self.classes.join(" ")
    }
}

pub type ElementHandle = Arc<Mutex<Element>>;

/// Lock an element, recovering the data if a writer panicked
pub fn lock_element(handle: &ElementHandle) -> MutexGuard<'_, Element> {
    match handle.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Warning,
    Error,
    Info,
}

impl NotificationLevel {
    pub fn css_class(&self) -> &'static str {
        match self {
            NotificationLevel::Success => "alert-success",
            NotificationLevel::Warning => "alert-warning",
            NotificationLevel::Error | NotificationLevel::Info => "alert-danger",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NotificationLevel::Success => "ok",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
            NotificationLevel::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: u64,
    pub level: NotificationLevel,
    pub message: String,
}

/// Element ids of the feedback page
pub const STANDARD_ELEMENT_IDS: &[&str] = &[
    "timeoutData",
    "timeoutMessage",
    "timeoutCountdown",
    "timeoutProgressBar",
    "textFeedback",
    "feedbackForm",
    "submitBtn",
    "csrfToken",
    "customTimeoutInput",
    "applyCustomTimeoutBtn",
];

/// Page model shared between the renderer and whatever displays it
#[derive(Debug)]
pub struct Document {
    elements: Mutex<HashMap<String, ElementHandle>>,
    notifications: Mutex<Vec<Notification>>,
    next_notification_id: AtomicU64,
    version_tx: watch::Sender<u64>,
}

impl Document {
    pub fn new() -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            elements: Mutex::new(HashMap::new()),
            notifications: Mutex::new(Vec::new()),
            next_notification_id: AtomicU64::new(1),
            version_tx,
        }
    }

    /// Document containing every element of the feedback page
    pub fn with_standard_layout() -> Self {
        let document = Self::new();
        for id in STANDARD_ELEMENT_IDS {
            document.insert(id);
        }
        if let Some(button) = document.get("submitBtn") {
            let mut button = lock_element(&button);
            button.text = "Submit feedback".to_string();
            button.set_classes("btn", Some("btn-success"));
        }
        document
    }

    fn elements(&self) -> MutexGuard<'_, HashMap<String, ElementHandle>> {
        match self.elements.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notification_list(&self) -> MutexGuard<'_, Vec<Notification>> {
        match self.notifications.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert an element, or return the existing one with that id
    pub fn insert(&self, id: &str) -> ElementHandle {
        let handle = Arc::clone(
            self.elements()
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Element::new(id)))),
        );
        self.touch();
        handle
    }

    pub fn get(&self, id: &str) -> Option<ElementHandle> {
        self.elements().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.elements().contains_key(id)
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = self.elements().remove(id);
        if let Some(old) = &removed {
            lock_element(old).attached = false;
            self.touch();
        }
        removed.is_some()
    }

    /// Replace an element with a fresh copy; handles to the old one detach
    pub fn recreate(&self, id: &str) -> ElementHandle {
        let fresh = Arc::new(Mutex::new(Element::new(id)));
        let old = self.elements().insert(id.to_string(), Arc::clone(&fresh));
        if let Some(old) = old {
            let mut old = lock_element(&old);
            old.attached = false;
            let mut new = lock_element(&fresh);
            new.text = old.text.clone();
            new.value = old.value.clone();
        }
        self.touch();
        fresh
    }

    /// Snapshot of an element's current contents
    pub fn element(&self, id: &str) -> Option<Element> {
        self.get(id).map(|handle| lock_element(&handle).clone())
    }

    pub fn append_notification(&self, level: NotificationLevel, message: &str) -> u64 {
        let id = self.next_notification_id.fetch_add(1, Ordering::Relaxed);
        self.notification_list().push(Notification {
            id,
            level,
            message: message.to_string(),
        });
        self.touch();
        id
    }

    pub fn remove_notification(&self, id: u64) -> bool {
        let removed = {
            let mut list = self.notification_list();
            let before = list.len();
            list.retain(|n| n.id != id);
            list.len() != before
        };
        if removed {
            self.touch();
        }
        removed
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notification_list().clone()
    }

    /// Signal that the page changed
    pub fn touch(&self) {
        self.version_tx.send_modify(|version| *version += 1);
    }

    /// Receiver notified after every change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
