use std::fmt;

/// What this binary was built from, recorded by the build script
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub build_profile: &'static str,
    pub build_features: &'static str,
    pub version: &'static str,
    pub build_timestamp: &'static str,
    pub rust_version: &'static str,
}

pub fn build_info() -> BuildInfo {
    BuildInfo {
        build_profile: env!("BUILD_PROFILE"),
        build_features: env!("BUILD_FEATURES"),
        version: env!("REPO_VERSION"),
        build_timestamp: env!("BUILD_TIMESTAMP"),
        rust_version: env!("RUST_VERSION"),
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cairn {} ({})", env!("CARGO_PKG_VERSION"), self.version)?;
        writeln!(f, "profile:  {}", self.build_profile)?;
        writeln!(f, "features: {}", self.build_features)?;
        writeln!(f, "built:    {}", self.build_timestamp)?;
        write!(f, "rustc:    {}", self.rust_version)
    }
}
