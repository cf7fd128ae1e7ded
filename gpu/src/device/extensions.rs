//! Extension requests and their resolution against what the driver offers.

use crate::error::{GraphicsError, GraphicsResult};

/// Ordered `{name: is_optional}` map of requested extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionRequests {
    entries: Vec<(String, bool)>,
}

impl ExtensionRequests {
    /// Create an empty request set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an extension that must be present.
    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.insert(name.into(), false);
        self
    }

    /// Request an extension that is used when present.
    pub fn request_optional(mut self, name: impl Into<String>) -> Self {
        self.insert(name.into(), true);
        self
    }

    /// Add or update an entry. Requiring an already-optional name makes it required.
    pub fn insert(&mut self, name: String, optional: bool) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, existing_optional)) => *existing_optional &= optional,
            None => self.entries.push((name, optional)),
        }
    }

    /// Whether `name` was requested at all.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(existing, _)| existing == name)
    }

    /// Iterate over `(name, is_optional)` in request order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries
            .iter()
            .map(|(name, optional)| (name.as_str(), *optional))
    }

    /// Number of requested extensions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was requested.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve the requests against the `available` names.
    ///
    /// Returns the names to enable, in request order. A missing required name
    /// fails with [`GraphicsError::ExtensionMissing`]; a missing optional name
    /// is logged and skipped.
    pub fn resolve<S: AsRef<str>>(&self, available: &[S]) -> GraphicsResult<Vec<String>> {
        let mut enabled = Vec::with_capacity(self.entries.len());
        for (name, optional) in &self.entries {
            if available.iter().any(|a| a.as_ref() == name) {
                enabled.push(name.clone());
            } else if *optional {
                log::warn!("Optional extension {} is not available, feature disabled", name);
            } else {
                log::error!("Required extension {} is not available", name);
                return Err(GraphicsError::ExtensionMissing(name.clone()));
            }
        }
        Ok(enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_skips_optional() {
        let requests = ExtensionRequests::new()
            .require("VK_KHR_swapchain")
            .request_optional("VK_EXT_mesh_shader");
        let enabled = requests.resolve(&["VK_KHR_swapchain"]).unwrap();
        assert_eq!(enabled, vec!["VK_KHR_swapchain".to_string()]);
    }

    #[test]
    fn test_resolve_fails_on_required() {
        let requests = ExtensionRequests::new().require("VK_KHR_ray_query");
        let err = requests.resolve(&["VK_KHR_swapchain"]).unwrap_err();
        assert_eq!(
            err,
            GraphicsError::ExtensionMissing("VK_KHR_ray_query".to_string())
        );
    }

    #[test]
    fn test_require_upgrades_optional() {
        let requests = ExtensionRequests::new()
            .request_optional("VK_KHR_swapchain")
            .require("VK_KHR_swapchain");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests.iter().next(), Some(("VK_KHR_swapchain", false)));
    }
}
