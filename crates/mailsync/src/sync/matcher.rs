//! Counterpart-to-contact matching

use anyhow::Result;
use std::collections::HashMap;

use crate::models::Contact;
use crate::storage::ContactDirectory;

/// Lower-cased email -> contact, loaded once per run
#[derive(Debug, Default)]
pub struct ContactMatcher {
    by_email: HashMap<String, Contact>,
}

impl ContactMatcher {
    /// Load the organization's directory with a single query
    pub fn load(directory: &dyn ContactDirectory, organization_id: &str) -> Result<Self> {
        Ok(Self::from_contacts(directory.contacts_for_organization(organization_id)?))
    }

    /// Earlier contacts win when two share an address
    pub fn from_contacts(contacts: Vec<Contact>) -> Self {
        let mut by_email = HashMap::with_capacity(contacts.len());
        for contact in contacts {
            let key = contact.email.trim().to_lowercase();
            by_email.entry(key).or_insert(contact);
        }
        Self { by_email }
    }

    pub fn match_contact(&self, address: &str) -> Option<i64> {
        if address.is_empty() {
            return None;
        }
        self.by_email.get(&address.to_lowercase()).map(|c| c.id)
    }

    pub fn len(&self) -> usize {
        self.by_email.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_email.is_empty()
    }
}
