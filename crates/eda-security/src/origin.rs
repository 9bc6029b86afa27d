//! Browser origin allow-list.

/// Allow-list of browser origins. `*` admits any origin.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    any: bool,
    allowed: Vec<String>,
}

impl OriginPolicy {
    /// Build a policy from configured origins.
    pub fn new(origins: &[String]) -> Self {
        let any = origins.iter().any(|o| o.trim() == "*");
        let allowed = origins
            .iter()
            .map(|o| o.trim().trim_end_matches('/').to_ascii_lowercase())
            .filter(|o| !o.is_empty() && o != "*")
            .collect();
        Self { any, allowed }
    }

    /// Whether any origin is admitted.
    pub fn allows_any(&self) -> bool {
        self.any
    }

    /// The explicit allow-list (empty when `*` is configured alone).
    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Whether `origin` may call the server.
    pub fn allows(&self, origin: &str) -> bool {
        if self.any {
            return true;
        }
        let origin = origin.trim().trim_end_matches('/').to_ascii_lowercase();
        self.allowed.iter().any(|o| *o == origin)
    }
}
