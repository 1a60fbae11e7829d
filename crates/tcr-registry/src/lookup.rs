//! Request → namespace lookup for request-handling middleware

use crate::registry::TenantRegistry;
use tcr_record::{is_valid_segment, NamespaceKind, NamespaceLabel, TenantId};

/// Path segments that introduce a tenant id in request paths
pub const TENANT_PATH_MARKERS: [&str; 2] = ["tenants", "t"];

impl TenantRegistry {
    /// Most specific registered label for a request path or header value
    ///
    /// Accepts a label (`tenant.7.blog`), a request path (`/tenants/7/blog/...`
    /// or `/t/7/...`) or a bare tenant id (`7`).
    #[must_use]
    pub fn lookup_by_request(&self, path_or_header: &str) -> Option<NamespaceLabel> {
        candidates(path_or_header.trim())
            .into_iter()
            .find(|label| self.contains(label))
    }
}

fn candidates(input: &str) -> Vec<NamespaceLabel> {
    if input.contains('/') {
        let segments: Vec<&str> = input
            .split(['/', '?', '#'])
            .filter(|s| !s.is_empty())
            .collect();
        let Some(at) = segments
            .windows(2)
            .position(|w| TENANT_PATH_MARKERS.contains(&w[0]))
        else {
            return Vec::new();
        };
        let Ok(tenant) = TenantId::new(segments[at + 1]) else {
            return Vec::new();
        };
        let component = segments.get(at + 2).copied().filter(|c| is_valid_segment(c));
        return tenant_candidates(&tenant, component);
    }

    if input.contains('.') {
        return match input.parse::<NamespaceLabel>() {
            Ok(label) if label.kind() == NamespaceKind::Tenant => match label.tenant_id() {
                Some(tenant) => tenant_candidates(&tenant, label.component()),
                None => vec![label],
            },
            Ok(label) => vec![label],
            Err(_) => Vec::new(),
        };
    }

    TenantId::new(input)
        .map(|tenant| tenant_candidates(&tenant, None))
        .unwrap_or_default()
}

fn tenant_candidates(tenant: &TenantId, component: Option<&str>) -> Vec<NamespaceLabel> {
    let mut out = Vec::with_capacity(2);
    if let Some(label) = component.and_then(|c| NamespaceLabel::tenant(tenant, Some(c)).ok()) {
        out.push(label);
    }
    if let Ok(root) = NamespaceLabel::tenant(tenant, None) {
        out.push(root);
    }
    out
}
