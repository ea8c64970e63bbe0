use async_trait::async_trait;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// The navigational context of the page issuing remote calls
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub pathname: String,
    /// Query string including the leading `?`, or empty
    pub search: String,
}

impl Location {
    /// Split an href into pathname and search. Any scheme and host are
    /// dropped, as is the fragment.
    pub fn parse(href: &str) -> Self {
        let without_origin = match href.find("://") {
            Some(scheme_end) => {
                let rest = &href[scheme_end + 3..];
                rest.find('/').map_or("/", |path_start| &rest[path_start..])
            }
            None => href,
        };
        let without_hash = without_origin
            .split_once('#')
            .map_or(without_origin, |(before, _)| before);

        let (pathname, search) = match without_hash.split_once('?') {
            Some((path, query)) if !query.is_empty() => (path, format!("?{}", query)),
            Some((path, _)) => (path, String::new()),
            None => (without_hash, String::new()),
        };

        Self {
            pathname: if pathname.is_empty() {
                "/".to_string()
            } else {
                pathname.to_string()
            },
            search,
        }
    }

    pub fn href(&self) -> String {
        format!("{}{}", self.pathname, self.search)
    }
}

/// Client-side navigation used when a remote function redirects
#[async_trait]
pub trait Navigator: Send + Sync {
    fn location(&self) -> Location;

    async fn goto(&self, location: &str);
}

/// Navigator without a browser: keeps the current location and a history
#[derive(Debug)]
pub struct MemoryNavigator {
    current: RwLock<Location>,
    history: RwLock<Vec<String>>,
}

impl MemoryNavigator {
    pub fn new(href: &str) -> Self {
        Self {
            current: RwLock::new(Location::parse(href)),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Every location passed to `goto`, oldest first
    pub fn history(&self) -> Vec<String> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MemoryNavigator {
    fn default() -> Self {
        Self::new("/")
    }
}

#[async_trait]
impl Navigator for MemoryNavigator {
    fn location(&self) -> Location {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn goto(&self, location: &str) {
        debug!("Navigating to {}", location);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Location::parse(location);
        self.history
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(location.to_string());
    }
}
