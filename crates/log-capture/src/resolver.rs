//! Locating a device's log files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use logcap_protocol::constants::DEVICE_PLACEHOLDER;
use logcap_protocol::{Channel, ChannelPaths};

/// Resolves the log file of each channel for a device.
///
/// The returned files need not exist yet.
pub trait LogPathResolver: Send + Sync {
    fn resolve_log_paths(&self, device_id: &str) -> ChannelPaths;
}

impl<F> LogPathResolver for F
where
    F: Fn(&str) -> ChannelPaths + Send + Sync,
{
    fn resolve_log_paths(&self, device_id: &str) -> ChannelPaths {
        self(device_id)
    }
}

/// Returns the same paths for every device.
#[derive(Debug, Clone, Default)]
pub struct StaticPathResolver {
    paths: ChannelPaths,
}

impl StaticPathResolver {
    pub fn new(paths: ChannelPaths) -> Self {
        Self { paths }
    }

    /// Adds or replaces the path of one channel.
    pub fn with(mut self, channel: Channel, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(channel, path.into());
        self
    }
}

impl LogPathResolver for StaticPathResolver {
    fn resolve_log_paths(&self, _device_id: &str) -> ChannelPaths {
        self.paths.clone()
    }
}

/// Substitutes the device id into per-channel path templates.
#[derive(Debug, Clone, Default)]
pub struct TemplatePathResolver {
    templates: BTreeMap<Channel, String>,
}

impl TemplatePathResolver {
    pub fn new(templates: BTreeMap<Channel, String>) -> Self {
        Self { templates }
    }
}

impl LogPathResolver for TemplatePathResolver {
    fn resolve_log_paths(&self, device_id: &str) -> ChannelPaths {
        self.templates
            .iter()
            .map(|(channel, template)| {
                let path = template.replace(DEVICE_PLACEHOLDER, device_id);
                (channel.clone(), PathBuf::from(path))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitutes_device_id() {
        let resolver = TemplatePathResolver::new(BTreeMap::from([
            (Channel::STDOUT, "/sim/{device}/app.out".to_string()),
            (Channel::STDERR, "/sim/{device}/app.err".to_string()),
        ]));

        let paths = resolver.resolve_log_paths("A1B2");
        assert_eq!(paths[&Channel::STDOUT], PathBuf::from("/sim/A1B2/app.out"));
        assert_eq!(paths[&Channel::STDERR], PathBuf::from("/sim/A1B2/app.err"));
    }

    #[test]
    fn static_resolver_ignores_device() {
        let resolver = StaticPathResolver::default().with(Channel::STDOUT, "/tmp/out.log");
        assert_eq!(
            resolver.resolve_log_paths("one"),
            resolver.resolve_log_paths("two")
        );
    }

    #[test]
    fn closures_are_resolvers() {
        let resolver = |device: &str| {
            ChannelPaths::from([(Channel::STDOUT, PathBuf::from(format!("/{device}.log")))])
        };
        assert_eq!(
            resolver.resolve_log_paths("booted")[&Channel::STDOUT],
            PathBuf::from("/booted.log")
        );
    }
}
