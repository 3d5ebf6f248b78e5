//! Native library selection and binding.

use std::sync::Arc;

use tessera_core::{NativeBinding, Resource};
use tracing::debug;

use crate::error::{ModuleError, ModuleResult};

/// Operating system and processor architecture used to select libraries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Operating system name, e.g. `linux`.
    pub os: String,
    /// Architecture name, e.g. `x86_64`.
    pub arch: String,
}

impl Platform {
    /// A specific platform.
    #[must_use]
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this process runs on.
    #[must_use]
    pub fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

/// Binds declared native libraries to content entries.
#[derive(Debug, Clone, Default)]
pub struct NativeCode {
    platform: Platform,
}

impl NativeCode {
    /// Select libraries for `platform`.
    #[must_use]
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// The selection platform.
    #[must_use]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Bind the native libraries declared by `host` and its `fragments`.
    ///
    /// Each declaring resource keeps the libraries that apply to the
    /// platform; a resource that declares libraries but has none for this
    /// platform fails. Every selected library must be present in the
    /// declaring resource's content, the host's content or another
    /// fragment's content, searched in that order.
    ///
    /// Nothing is recorded on the resources; the caller stores the returned
    /// bindings once the whole batch has bound.
    ///
    /// # Errors
    ///
    /// - [`ModuleError::NoMatchingNativeLibrary`] if no declared library
    ///   applies to the platform.
    /// - [`ModuleError::NativeLibraryNotFound`] if a selected library is
    ///   not in any searched content root.
    pub fn resolve_native_code(
        &self,
        host: &Resource,
        fragments: &[Arc<Resource>],
    ) -> ModuleResult<Vec<NativeBinding>> {
        let mut bindings: Vec<NativeBinding> = Vec::new();
        let declaring = std::iter::once(host).chain(fragments.iter().map(AsRef::as_ref));

        for declarer in declaring {
            let declared = declarer.native_libraries();
            if declared.is_empty() {
                continue;
            }
            let selected: Vec<_> = declared
                .iter()
                .filter(|lib| lib.matches_platform(&self.platform.os, &self.platform.arch))
                .collect();
            if selected.is_empty() {
                return Err(ModuleError::NoMatchingNativeLibrary {
                    resource: declarer.id(),
                    os: self.platform.os.clone(),
                    arch: self.platform.arch.clone(),
                });
            }

            let search = std::iter::once(declarer)
                .chain(std::iter::once(host))
                .chain(fragments.iter().map(AsRef::as_ref));
            let search: Vec<&Resource> = search.collect();

            for library in selected {
                let provider = search
                    .iter()
                    .find(|r| r.content_roots().iter().any(|root| root.contains(&library.path)))
                    .ok_or_else(|| ModuleError::NativeLibraryNotFound {
                        resource: declarer.id(),
                        path: library.path.clone(),
                    })?;
                let name = library.library_name().to_owned();
                if bindings.iter().any(|b| b.name == name) {
                    continue;
                }
                debug!(resource = %declarer, library = %name, "Native library bound");
                bindings.push(NativeBinding {
                    name,
                    path: library.path.clone(),
                    provider: provider.id(),
                });
            }
        }
        Ok(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{ContentRoot, NativeLibrary};
    use tessera_test::{ResourceFactory, test_fragment, test_host};

    fn linux() -> NativeCode {
        NativeCode::new(Platform::new("linux", "x86_64"))
    }

    #[test]
    fn test_binds_library_in_host_content() {
        let mut factory = ResourceFactory::new();
        let host = factory.create(
            &test_host("native", "1.0")
                .with_native_library(NativeLibrary::new("lib/libacme.so").for_os("Linux"))
                .with_native_library(NativeLibrary::new("lib/acme.dll").for_os("windows"))
                .with_content(ContentRoot::new("main", ["lib/libacme.so"])),
        );

        let bindings = linux().resolve_native_code(&host, &[]).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].name, "libacme");
        assert_eq!(bindings[0].provider, host.id());
    }

    #[test]
    fn test_library_found_in_fragment_content() {
        let mut factory = ResourceFactory::new();
        let host = factory.create(
            &test_host("native", "1.0").with_native_library(NativeLibrary::new("lib/libacme.so")),
        );
        let fragment = factory.create(
            &test_fragment("native.linux", "native")
                .with_content(ContentRoot::new("natives", ["lib/libacme.so"])),
        );

        let bindings = linux()
            .resolve_native_code(&host, &[Arc::clone(&fragment)])
            .unwrap();
        assert_eq!(bindings[0].provider, fragment.id());
    }

    #[test]
    fn test_missing_library_fails() {
        let mut factory = ResourceFactory::new();
        let host = factory.create(
            &test_host("native", "1.0").with_native_library(NativeLibrary::new("lib/libacme.so")),
        );
        assert!(matches!(
            linux().resolve_native_code(&host, &[]),
            Err(ModuleError::NativeLibraryNotFound { .. })
        ));
    }

    #[test]
    fn test_no_library_for_platform_fails() {
        let mut factory = ResourceFactory::new();
        let host = factory.create(
            &test_host("native", "1.0")
                .with_native_library(NativeLibrary::new("lib/acme.dll").for_os("windows")),
        );
        assert!(matches!(
            linux().resolve_native_code(&host, &[]),
            Err(ModuleError::NoMatchingNativeLibrary { .. })
        ));
    }

    #[test]
    fn test_no_declared_libraries() {
        let mut factory = ResourceFactory::new();
        let host = factory.create(&test_host("plain", "1.0"));
        assert!(linux().resolve_native_code(&host, &[]).unwrap().is_empty());
    }
}
