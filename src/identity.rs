//! Canonical contributor identities and alias resolution.

use crate::model::RemoteUser;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use tracing::debug;

pub const OTHER_KEY: &str = "other";

/// A canonical contributor. The key is the primary email.
#[derive(Debug)]
pub struct Identity {
    pub id: usize,
    key: String,
    username: Option<String>,
    public_email: Option<String>,
    configured: Vec<String>,
    aliases: OnceLock<Vec<String>>,
}

impl Identity {
    fn new(
        id: usize,
        key: String,
        username: Option<String>,
        public_email: Option<String>,
        configured: Vec<String>,
    ) -> Self {
        Self {
            id,
            key,
            username: username.filter(|s| !s.is_empty()),
            public_email: public_email.filter(|s| !s.is_empty()),
            configured,
            aliases: OnceLock::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_other(&self) -> bool {
        self.key == OTHER_KEY
    }

    /// Configured aliases plus the platform username and public email when they
    /// are not already listed. Computed on first access and cached.
    pub fn aliases(&self) -> &[String] {
        self.aliases.get_or_init(|| {
            let mut aliases = self.configured.clone();
            for extra in [&self.username, &self.public_email].into_iter().flatten() {
                if !aliases.contains(extra) {
                    aliases.push(extra.clone());
                }
            }
            aliases
        })
    }
}

/// Alias -> identity lookup. Total: anything unknown resolves to the "other" identity.
#[derive(Debug)]
pub struct IdentityResolver {
    identities: Vec<Arc<Identity>>,
    by_alias: HashMap<String, Arc<Identity>>,
    other: Arc<Identity>,
}

impl IdentityResolver {
    /// `configured` maps canonical keys to operator aliases; `users` is the remote
    /// user listing. Configured keys with no remote user still become identities.
    pub fn build(configured: &BTreeMap<String, Vec<String>>, users: &[RemoteUser]) -> Self {
        let mut identities: Vec<Arc<Identity>> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();

        for user in users {
            let key = user
                .email
                .clone()
                .filter(|email| !email.is_empty())
                .unwrap_or_else(|| user.username.clone());
            if key.is_empty() || by_key.contains_key(&key) {
                continue;
            }
            let aliases = configured.get(&key).cloned().unwrap_or_default();
            by_key.insert(key.clone(), identities.len());
            identities.push(Arc::new(Identity::new(
                identities.len(),
                key,
                Some(user.username.clone()),
                user.public_email.clone(),
                aliases,
            )));
        }

        for (key, aliases) in configured {
            if key == OTHER_KEY || by_key.contains_key(key) {
                continue;
            }
            by_key.insert(key.clone(), identities.len());
            identities.push(Arc::new(Identity::new(
                identities.len(),
                key.clone(),
                None,
                None,
                aliases.clone(),
            )));
        }

        let other = Arc::new(Identity::new(
            identities.len(),
            OTHER_KEY.to_string(),
            None,
            None,
            Vec::new(),
        ));
        identities.push(Arc::clone(&other));

        // Canonical keys always resolve to their own identity; aliases fill the rest.
        let mut by_alias: HashMap<String, Arc<Identity>> = identities
            .iter()
            .filter(|i| !i.is_other())
            .map(|identity| (identity.key().to_string(), Arc::clone(identity)))
            .collect();
        for identity in identities.iter().filter(|i| !i.is_other()) {
            for name in identity.aliases() {
                match by_alias.get(name) {
                    Some(owner) if owner.id != identity.id => {
                        debug!("alias {name} already belongs to {}, ignoring for {}", owner.key(), identity.key());
                    }
                    Some(_) => {}
                    None => {
                        by_alias.insert(name.clone(), Arc::clone(identity));
                    }
                }
            }
        }

        Self {
            identities,
            by_alias,
            other,
        }
    }

    /// Every identity including "other", indexed by `Identity::id`.
    pub fn identities(&self) -> &[Arc<Identity>] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn resolve(&self, alias: &str) -> &Arc<Identity> {
        match self.by_alias.get(alias) {
            Some(identity) => identity,
            None => {
                debug!("unknown user {alias}, using default");
                &self.other
            }
        }
    }

    /// Canonical key -> full alias list.
    pub fn aliases_by_key(&self) -> BTreeMap<&str, &[String]> {
        self.identities
            .iter()
            .map(|identity| (identity.key(), identity.aliases()))
            .collect()
    }
}
