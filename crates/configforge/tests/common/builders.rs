//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

/// Builds kubeconfig YAML with one cluster, user and context per entry.
pub struct KubeConfigBuilder {
    entries: Vec<(String, String)>,
    current: Option<String>,
    header: Option<String>,
}

impl KubeConfigBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            current: None,
            header: None,
        }
    }

    /// Adds cluster `<name>-cluster`, user `<name>-user` and context `<name>`.
    pub fn context(mut self, name: &str, server: &str) -> Self {
        self.entries.push((name.to_string(), server.to_string()));
        self
    }

    pub fn current(mut self, name: &str) -> Self {
        self.current = Some(name.to_string());
        self
    }

    /// Leading comment line.
    pub fn header(mut self, comment: &str) -> Self {
        self.header = Some(comment.to_string());
        self
    }

    pub fn build(self) -> String {
        let mut out = String::new();
        if let Some(header) = &self.header {
            out.push_str(&format!("# {}\n", header));
        }
        out.push_str("apiVersion: v1\nkind: Config\n");

        out.push_str("clusters:\n");
        for (name, server) in &self.entries {
            out.push_str(&format!(
                "- name: {name}-cluster\n  cluster:\n    server: {server}\n"
            ));
        }
        out.push_str("users:\n");
        for (name, _) in &self.entries {
            out.push_str(&format!("- name: {name}-user\n  user:\n    token: {name}-token\n"));
        }
        out.push_str("contexts:\n");
        for (name, _) in &self.entries {
            out.push_str(&format!(
                "- name: {name}\n  context:\n    cluster: {name}-cluster\n    user: {name}-user\n"
            ));
        }

        let current = self
            .current
            .or_else(|| self.entries.first().map(|(name, _)| name.clone()));
        if let Some(current) = current {
            out.push_str(&format!("current-context: {}\n", current));
        }
        out
    }
}

/// Single-context kubeconfig pointing at `https://<name>.example.com`.
pub fn simple_kubeconfig(name: &str) -> String {
    KubeConfigBuilder::new()
        .context(name, &format!("https://{}.example.com", name))
        .build()
}
