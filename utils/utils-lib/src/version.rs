pub mod macros {
    /// Returns the package description, viz its name and version.
    #[macro_export]
    macro_rules! package_description {
        () => {
            concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
        };
    }

    /// Gets package's version info as a static str.
    /// Each call to this macro leaks a string.
    #[macro_export]
    macro_rules! version_info_str {
        () => {
            Box::leak(Box::new(format!(
                "version {}, revision {}",
                env!("CARGO_PKG_VERSION"),
                $crate::raw_version_str()
            ))) as &'static str
        };
    }
}

/// The revision this workspace was built from, as supplied through `GIT_VERSION`.
pub fn raw_version_str() -> &'static str {
    option_env!("GIT_VERSION").unwrap_or("unknown")
}
