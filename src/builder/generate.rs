//! Sources of the generated library crate.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::env::BuildEnv;
use super::error::BuildError;
use super::resolve::{CrateSource, Plugin};

/// Package and library name of the generated crate.
pub const LIB_NAME: &str = "rs7zplugin";

/// Name of this crate as a dependency of the generated one.
const BASE_PACKAGE: &str = "sevenzip-plugins";

/// This crate's name in the generated code. No plugin crate or module may
/// take it.
pub const BASE_LIB: &str = "sevenzip_plugins";

/// Overrides where the generated crate finds this crate.
pub const BASE_PATH_ENV: &str = "SEVENZIP_PLUGIN_PATH";

pub const RESOURCE_FILE: &str = "rsrc.res";

pub const HEADER: &str = "// Code generated by sevenzip-plugins-build. DO NOT EDIT.";

/// Where the generated crate gets this crate from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseCrate {
    Path(PathBuf),
    Version(String),
}

impl BaseCrate {
    /// `$SEVENZIP_PLUGIN_PATH`, else the source tree this tool was built
    /// from if it still exists, else the registry release of the same version.
    pub fn locate(env: &BuildEnv) -> Self {
        if let Some(path) = env.get(BASE_PATH_ENV).filter(|p| !p.is_empty()) {
            return Self::Path(path.into());
        }
        let source = Path::new(env!("CARGO_MANIFEST_DIR"));
        if source.join("Cargo.toml").is_file() {
            return Self::Path(source.to_path_buf());
        }
        Self::Version(format!("={}", env!("CARGO_PKG_VERSION")))
    }
}

#[derive(Serialize)]
struct Manifest<'a> {
    package: PackageSection<'a>,
    lib: LibSection<'a>,
    dependencies: BTreeMap<&'a str, Dependency<'a>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    patch: BTreeMap<&'a str, BTreeMap<&'a str, Dependency<'a>>>,
    workspace: BTreeMap<&'a str, ()>,
}

#[derive(Serialize)]
struct PackageSection<'a> {
    name: &'a str,
    version: &'a str,
    edition: &'a str,
    publish: bool,
    build: &'a str,
}

#[derive(Serialize)]
struct LibSection<'a> {
    name: &'a str,
    path: &'a str,
    #[serde(rename = "crate-type")]
    crate_type: [&'a str; 1],
}

#[derive(Serialize, Default)]
struct Dependency<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    package: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(rename = "default-features", skip_serializing_if = "Option::is_none")]
    default_features: Option<bool>,
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// `Cargo.toml` of the generated crate.
pub fn manifest(plugins: &[Plugin], base: &BaseCrate) -> Result<String, BuildError> {
    let base_dep = || match base {
        BaseCrate::Path(path) => Dependency {
            path: Some(path_string(path)),
            default_features: Some(false),
            ..Default::default()
        },
        BaseCrate::Version(version) => Dependency {
            version: Some(version.clone()),
            default_features: Some(false),
            ..Default::default()
        },
    };

    let mut dependencies = BTreeMap::new();
    dependencies.insert(BASE_PACKAGE, base_dep());
    for plugin in plugins {
        let Plugin::Crate {
            package,
            lib_name,
            source,
        } = plugin
        else {
            continue;
        };
        let mut dep = Dependency {
            package: (package != lib_name).then_some(package.as_str()),
            ..Default::default()
        };
        match source {
            CrateSource::Path(dir) => dep.path = Some(path_string(dir)),
            CrateSource::Registry(req) => dep.version = Some(req.to_string()),
        }
        dependencies.insert(lib_name.as_str(), dep);
    }

    // Plugins from the registry must link against the same copy of this
    // crate as the generated library.
    let mut patch = BTreeMap::new();
    if matches!(base, BaseCrate::Path(_)) {
        patch.insert("crates-io", BTreeMap::from([(BASE_PACKAGE, base_dep())]));
    }

    let manifest = Manifest {
        package: PackageSection {
            name: LIB_NAME,
            version: "0.0.0",
            edition: "2024",
            publish: false,
            build: "build.rs",
        },
        lib: LibSection {
            name: LIB_NAME,
            path: "src/lib.rs",
            crate_type: ["cdylib"],
        },
        dependencies,
        patch,
        workspace: BTreeMap::new(),
    };
    let body = toml::to_string(&manifest).map_err(|e| BuildError::Generate {
        what: "Cargo.toml",
        reason: e.to_string(),
    })?;
    Ok(format!("{}\n\n{body}", HEADER.replacen("//", "#", 1)))
}

/// `src/lib.rs` of the generated crate: module declarations for standalone
/// files, then the exports with every plugin in order.
pub fn lib_source(plugins: &[Plugin]) -> String {
    let mut src = format!("{HEADER}\n\n");
    let mut any_module = false;
    for plugin in plugins {
        if let Plugin::Module { module, .. } = plugin {
            let _ = writeln!(src, "mod {module};");
            any_module = true;
        }
    }
    if any_module {
        src.push('\n');
    }
    let _ = writeln!(src, "{BASE_LIB}::export_plugin!(");
    for plugin in plugins {
        let _ = writeln!(src, "    {},", plugin.register_path());
    }
    src.push_str(");\n");
    src
}

/// `build.rs` of the generated crate: links the version resource on MSVC.
pub fn build_script() -> String {
    format!(
        r#"{HEADER}

fn main() {{
    println!("cargo:rerun-if-changed={RESOURCE_FILE}");
    let target_env = std::env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();
    if target_env == "msvc" {{
        let res = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("{RESOURCE_FILE}");
        println!("cargo:rustc-link-arg-cdylib={{}}", res.display());
    }} else {{
        println!("cargo:warning=version resource not linked for target env {{target_env:?}}");
    }}
}}
"#
    )
}

/// Source numbered for the transcript, one `NNN | line` per line.
pub fn numbered(src: &str) -> String {
    src.lines()
        .enumerate()
        .fold(String::new(), |mut out, (i, line)| {
            let _ = writeln!(out, "{:3} | {line}", i + 1);
            out
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugins() -> Vec<Plugin> {
        vec![
            Plugin::Crate {
                package: "vpk-7z".into(),
                lib_name: "vpk_7z".into(),
                source: CrateSource::Registry("^0.3".parse().unwrap()),
            },
            Plugin::Module {
                module: "pak".into(),
                source: "formats/pak.rs".into(),
                display: "formats/pak".into(),
            },
            Plugin::Crate {
                package: "local".into(),
                lib_name: "local".into(),
                source: CrateSource::Path("/src/local".into()),
            },
        ]
    }

    #[test]
    fn lib_source_keeps_order() {
        let src = lib_source(&plugins());
        assert!(src.starts_with(HEADER));
        let expected = "\
mod pak;

sevenzip_plugins::export_plugin!(
    vpk_7z::register,
    pak::register,
    local::register,
);
";
        assert!(src.ends_with(expected), "{src}");
    }

    #[test]
    fn manifest_contents() {
        let text = manifest(&plugins(), &BaseCrate::Path("/base".into())).unwrap();
        assert!(text.starts_with("# Code generated"));
        let doc: toml::Table = text.parse().unwrap();

        assert_eq!(doc["package"]["name"].as_str(), Some(LIB_NAME));
        assert_eq!(doc["lib"]["crate-type"][0].as_str(), Some("cdylib"));
        assert!(doc["workspace"].as_table().unwrap().is_empty());

        let deps = doc["dependencies"].as_table().unwrap();
        assert_eq!(deps["vpk_7z"]["package"].as_str(), Some("vpk-7z"));
        assert_eq!(deps["vpk_7z"]["version"].as_str(), Some("^0.3"));
        assert_eq!(deps["local"]["path"].as_str(), Some("/src/local"));
        assert!(deps["local"].get("package").is_none());
        assert_eq!(deps[BASE_PACKAGE]["default-features"].as_bool(), Some(false));
        assert_eq!(
            doc["patch"]["crates-io"][BASE_PACKAGE]["path"].as_str(),
            Some("/base")
        );
    }

    #[test]
    fn registry_base_has_no_patch() {
        let text = manifest(&[], &BaseCrate::Version("=0.1.0".into())).unwrap();
        let doc: toml::Table = text.parse().unwrap();
        assert!(doc.get("patch").is_none());
        assert_eq!(doc["dependencies"][BASE_PACKAGE]["version"].as_str(), Some("=0.1.0"));
    }

    #[test]
    fn build_script_links_resource() {
        let script = build_script();
        assert!(script.contains("cargo:rustc-link-arg-cdylib="));
        assert!(script.contains("\"msvc\""));
        assert!(script.contains(RESOURCE_FILE));
    }

    #[test]
    fn numbering() {
        assert_eq!(numbered("a\nb\n"), "  1 | a\n  2 | b\n");
    }
}
