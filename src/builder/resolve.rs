//! Turns plugin specs into the crates and modules of the generated library.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use super::args::Spec;
use super::env::BuildEnv;
use super::error::BuildError;
use super::generate::BASE_LIB;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrateSource {
    /// Directory holding the crate's manifest.
    Path(PathBuf),
    Registry(semver::VersionReq),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plugin {
    /// A crate dependency of the generated library.
    Crate {
        package: String,
        /// Name the crate is referred to by in Rust code.
        lib_name: String,
        source: CrateSource,
    },
    /// A standalone file copied into the generated library as a module.
    Module {
        module: String,
        source: PathBuf,
        /// File name as given, without `.rs`.
        display: String,
    },
}

impl Plugin {
    pub fn display_name(&self) -> &str {
        match self {
            Self::Crate { package, .. } => package,
            Self::Module { display, .. } => display,
        }
    }

    /// Path of the plugin's `register` function inside the generated crate.
    pub fn register_path(&self) -> String {
        match self {
            Self::Crate { lib_name, .. } => format!("{lib_name}::register"),
            Self::Module { module, .. } => format!("{module}::register"),
        }
    }
}

/// Resolve every spec, keeping command-line order. Local crates are queried
/// with `cargo metadata`; a workspace expands to its members by name.
pub async fn resolve(specs: &[Spec], env: &BuildEnv) -> Result<Vec<Plugin>, BuildError> {
    let mut plugins = Vec::new();
    for spec in specs {
        match spec {
            Spec::Local { arg, manifest } => {
                let metadata = cargo_metadata(arg, manifest, env).await?;
                plugins.extend(select_packages(&metadata, arg, manifest)?);
            }
            other => plugins.push(resolve_offline(other)?),
        }
    }
    Ok(dedup(plugins))
}

/// Resolve a spec that needs no cargo query.
pub fn resolve_offline(spec: &Spec) -> Result<Plugin, BuildError> {
    match spec {
        Spec::File { path, .. } => Ok(Plugin::Module {
            module: module_name(path),
            source: path.clone(),
            display: spec.display_name().to_string(),
        }),
        Spec::Registry { name, req } => {
            let lib_name = name.replace('-', "_");
            if lib_name == BASE_LIB {
                return Err(base_library(name));
            }
            Ok(Plugin::Crate {
                package: name.clone(),
                lib_name,
                source: CrateSource::Registry(req.clone()),
            })
        }
        Spec::Local { arg, .. } => Err(BuildError::Resolve {
            spec: arg.clone(),
            reason: "local crates need cargo metadata".into(),
        }),
    }
}

async fn cargo_metadata(arg: &str, manifest: &Path, env: &BuildEnv) -> Result<Vec<u8>, BuildError> {
    debug!(manifest = %manifest.display(), "cargo metadata");
    let output = Command::new(env.cargo())
        .args(["metadata", "--no-deps", "--format-version", "1", "--manifest-path"])
        .arg(manifest)
        .envs(env.overrides().iter().cloned())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| BuildError::Toolchain(format!("run {} metadata: {e}", env.cargo())))?;

    if !output.status.success() {
        return Err(BuildError::Resolve {
            spec: arg.to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

#[derive(Debug, Deserialize)]
struct Metadata {
    packages: Vec<Package>,
    workspace_members: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Package {
    name: String,
    id: String,
    manifest_path: PathBuf,
    targets: Vec<Target>,
}

#[derive(Debug, Deserialize)]
struct Target {
    name: String,
    kind: Vec<String>,
}

impl Package {
    fn lib_name(&self) -> Option<String> {
        self.targets
            .iter()
            .find(|t| t.kind.iter().any(|k| k == "lib" || k == "rlib"))
            .map(|t| t.name.replace('-', "_"))
    }

    fn plugin(&self, lib_name: String) -> Plugin {
        let dir = self
            .manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Plugin::Crate {
            package: self.name.clone(),
            lib_name,
            source: CrateSource::Path(dir),
        }
    }
}

/// Pick the plugin crates a local spec names from `cargo metadata` output.
fn select_packages(json: &[u8], arg: &str, manifest: &Path) -> Result<Vec<Plugin>, BuildError> {
    let err = |reason: String| BuildError::Resolve {
        spec: arg.to_string(),
        reason,
    };
    let metadata: Metadata =
        serde_json::from_slice(json).map_err(|e| err(format!("parse cargo metadata: {e}")))?;

    let wanted = canonical(manifest);
    if let Some(pkg) = metadata
        .packages
        .iter()
        .find(|p| canonical(&p.manifest_path) == wanted)
    {
        let lib = pkg
            .lib_name()
            .ok_or_else(|| err(format!("package {} has no library target", pkg.name)))?;
        if lib == BASE_LIB {
            return Err(base_library(arg));
        }
        return Ok(vec![pkg.plugin(lib)]);
    }

    // A virtual manifest: take every member with a library.
    let mut members: Vec<&Package> = metadata
        .packages
        .iter()
        .filter(|p| metadata.workspace_members.contains(&p.id))
        .collect();
    members.sort_by(|a, b| a.name.cmp(&b.name));

    let plugins: Vec<Plugin> = members
        .into_iter()
        .filter_map(|pkg| match pkg.lib_name() {
            Some(lib) if lib == BASE_LIB => {
                warn!(package = %pkg.name, "skipping the plugin library itself");
                None
            }
            Some(lib) => Some(pkg.plugin(lib)),
            None => {
                warn!(package = %pkg.name, "skipping workspace member without a library target");
                None
            }
        })
        .collect();
    if plugins.is_empty() {
        return Err(err("workspace has no library members".into()));
    }
    Ok(plugins)
}

fn base_library(spec: &str) -> BuildError {
    BuildError::InvalidSpec {
        spec: spec.to_string(),
        reason: format!("{BASE_LIB} is linked into every bundle and is not a plugin"),
    }
}

fn canonical(path: &Path) -> PathBuf {
    strip_verbatim(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()))
}

/// Windows canonical paths carry a `\\?\` prefix that cargo does not print.
fn strip_verbatim(path: PathBuf) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_prefix(r"\\?\")) {
        Some(stripped) => PathBuf::from(stripped),
        None => path,
    }
}

/// Identifier for a standalone file's module.
fn module_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    // `mod sevenzip_plugins;` would shadow the extern crate.
    if KEYWORDS.contains(&name.as_str()) || name == BASE_LIB {
        name.push('_');
    }
    name
}

const KEYWORDS: &[&str] = &[
    "as", "async", "await", "box", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "gen", "if", "impl", "in", "let", "loop", "match", "mod",
    "move", "mut", "pub", "ref", "return", "self", "static", "struct", "super", "trait", "true",
    "try", "type", "unsafe", "use", "where", "while", "yield",
];

/// Drop repeated crates and give every module a unique name.
fn dedup(plugins: Vec<Plugin>) -> Vec<Plugin> {
    let mut names = HashSet::new();
    let mut out = Vec::with_capacity(plugins.len());
    for plugin in &plugins {
        if let Plugin::Crate { lib_name, .. } = plugin {
            names.insert(lib_name.clone());
        }
    }
    let mut seen_crates = HashSet::new();
    for plugin in plugins {
        match plugin {
            Plugin::Crate { ref lib_name, .. } => {
                if !seen_crates.insert(lib_name.clone()) {
                    warn!(crate_name = %lib_name, "plugin crate given more than once");
                    continue;
                }
                out.push(plugin);
            }
            Plugin::Module {
                module,
                source,
                display,
            } => {
                let mut unique = module.clone();
                let mut n = 2;
                while !names.insert(unique.clone()) {
                    unique = format!("{module}_{n}");
                    n += 1;
                }
                out.push(Plugin::Module {
                    module: unique,
                    source,
                    display,
                });
            }
        }
    }
    out
}
