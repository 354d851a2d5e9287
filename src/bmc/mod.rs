pub mod bmc;
pub mod client;
pub mod monitor_bmc;
pub mod redfish;

#[cfg(test)]
pub(crate) mod fake_bmc;

pub use bmc::RedfishAdapter;
pub use client::ClientProvider;

/// Directory part of a Redfish URI, like `path.Dir` on a slash path.
#[must_use]
pub fn parent_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}

/// Last segment of a Redfish URI.
#[must_use]
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}
