//! GLSL version and extension requirements gathered during emission

use std::collections::HashSet;

/// `#version` numbers the emitter knows how to spell
pub const KNOWN_GLSL_VERSIONS: [u32; 12] = [110, 120, 130, 140, 150, 330, 400, 410, 420, 430, 440, 450];

/// Version written when the required one is not in [`KNOWN_GLSL_VERSIONS`]
pub const FALLBACK_GLSL_VERSION: u32 = 420;

const BASELINE_GLSL_VERSION: u32 = 110;

/// Monotone set of version and extension requirements
#[derive(Debug, Clone)]
pub struct ExtensionTracker {
    version: u32,
    extensions: Vec<String>,
    seen: HashSet<String>,
}

impl Default for ExtensionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionTracker {
    /// Tracker requiring only the baseline version
    pub fn new() -> Self {
        Self {
            version: BASELINE_GLSL_VERSION,
            extensions: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Raise the required version; lower requests are ignored
    pub fn require_version(&mut self, version: u32) {
        if version > self.version {
            tracing::trace!(from = self.version, to = version, "raised required version");
            self.version = version;
        }
    }

    /// Require an extension; repeated requests are ignored
    pub fn require_extension(&mut self, name: &str) {
        if self.seen.insert(name.to_string()) {
            self.extensions.push(name.to_string());
        }
    }

    /// Highest version required so far
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Required extensions in first-required order
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// The `#version` line
    pub fn version_directive(&self) -> String {
        let version = if KNOWN_GLSL_VERSIONS.contains(&self.version) {
            self.version
        } else {
            FALLBACK_GLSL_VERSION
        };
        format!("#version {}\n", version)
    }

    /// One `#extension` line per required extension
    pub fn extension_directives(&self) -> String {
        let mut out = String::new();
        for name in &self.extensions {
            out.push_str(&format!("#extension {} : require\n", name));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_only_rises() {
        let mut tracker = ExtensionTracker::new();
        tracker.require_version(430);
        tracker.require_version(400);
        assert_eq!(tracker.version(), 430);
        assert_eq!(tracker.version_directive(), "#version 430\n");
    }

    #[test]
    fn test_unknown_version_falls_back() {
        let mut tracker = ExtensionTracker::new();
        tracker.require_version(460);
        assert_eq!(tracker.version_directive(), "#version 420\n");
    }

    #[test]
    fn test_extensions_deduplicated_in_order() {
        let mut tracker = ExtensionTracker::new();
        tracker.require_extension("GL_ARB_gpu_shader_int64");
        tracker.require_extension("GL_EXT_samplerless_texture_functions");
        tracker.require_extension("GL_ARB_gpu_shader_int64");
        assert_eq!(
            tracker.extension_directives(),
            "#extension GL_ARB_gpu_shader_int64 : require\n\
             #extension GL_EXT_samplerless_texture_functions : require\n"
        );
    }
}
