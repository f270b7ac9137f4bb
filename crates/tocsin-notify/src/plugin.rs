use std::collections::HashMap;
use std::sync::Arc;

use crate::Sender;

/// Registry of delivery transports, keyed by contact type.
#[derive(Default)]
pub struct SenderRegistry {
    senders: HashMap<String, Arc<dyn Sender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sender: Arc<dyn Sender>) {
        self.senders.insert(sender.sender_type().to_string(), sender);
    }

    pub fn get(&self, contact_type: &str) -> Option<Arc<dyn Sender>> {
        self.senders.get(contact_type).cloned()
    }

    pub fn has_sender(&self, contact_type: &str) -> bool {
        self.senders.contains_key(contact_type)
    }

    pub fn sender_types(&self) -> Vec<&str> {
        self.senders.keys().map(String::as_str).collect()
    }
}
