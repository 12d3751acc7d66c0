//! Command-line parsing for the build tool.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::error::BuildError;

/// Base name of the produced library; the arch is appended.
pub const DLL_NAME: &str = "rs7zPlugin";

pub const HELP: &str = "\
Command sevenzip-plugins-build builds 7-Zip format plugins written in Rust.

Usage:
    sevenzip-plugins-build ARCH [KEY=VALUE]... [-o=OUTPUT] [CARGO_FLAGS]... [PLUGIN]...

ARCH is one of 64 (x64), 32 (x86) or ARM64 (arm64).

Leading KEY=VALUE arguments are set in the environment of every cargo
command the tool runs, e.g. CARGO_TARGET_DIR=target or RUSTFLAGS=...

The output file defaults to rs7zPlugin<ARCH>.dll in the current directory.
Set it with -o=FILE or -o FILE.

Each PLUGIN is one of:
    path/to/file.rs     a standalone plugin module
    path/to/crate       a local crate or workspace (every member is added)
    name[@VERSION_REQ]  a crate from the registry

Every plugin exposes `pub fn register(registry: &mut Registry)`. Plugins
are registered in the order given.

Everything between the options above and the first PLUGIN is passed to
cargo build. Plugins are collected from the end of the argument list back
to the first argument starting with '-', so cargo flags that take a value
must be written as --flag=value.

If SOURCE_DATE_EPOCH is set, it is used as the build time; the file version
is YEAR.MONTH.DAY.BUILD. Under GitHub Actions the repository owner, run
number and commit are recorded in the version resource.

Examples:
    sevenzip-plugins-build 64 --release ./formats/vpk ./formats/pak.rs
    sevenzip-plugins-build ARM64 -o=out/plugins.dll --release vpk-7z@0.3
";

/// Target architecture of the plugin library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X64,
    X86,
    Arm64,
}

impl Arch {
    /// The arch as written on the command line and in file names.
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::X64 => "64",
            Self::X86 => "32",
            Self::Arm64 => "ARM64",
        }
    }

    pub fn target_triple(self) -> &'static str {
        match self {
            Self::X64 => "x86_64-pc-windows-msvc",
            Self::X86 => "i686-pc-windows-msvc",
            Self::Arm64 => "aarch64-pc-windows-msvc",
        }
    }

    /// The name 7-Zip uses for this platform.
    pub fn platform(self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::X86 => "x86",
            Self::Arm64 => "arm64",
        }
    }

    pub fn default_output(self) -> PathBuf {
        format!("{DLL_NAME}{}.dll", self.as_arg()).into()
    }
}

impl FromStr for Arch {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "64" => Ok(Self::X64),
            "32" => Ok(Self::X86),
            "ARM64" => Ok(Self::Arm64),
            _ => Err(BuildError::UnknownArch(s.to_string())),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// A plugin argument, classified but not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Spec {
    /// A standalone `.rs` module; `arg` is the path as given.
    File { arg: String, path: PathBuf },
    /// A local crate or workspace, by manifest path.
    Local { arg: String, manifest: PathBuf },
    /// A registry crate with a version requirement.
    Registry { name: String, req: semver::VersionReq },
}

impl Spec {
    /// Classify one plugin argument. Relative paths are resolved against `dir`.
    pub fn parse(arg: &str, dir: &Path) -> Result<Self, BuildError> {
        let invalid = |reason: String| BuildError::InvalidSpec {
            spec: arg.to_string(),
            reason,
        };

        if arg.is_empty() {
            return Err(invalid("empty plugin name".into()));
        }
        if arg.ends_with(".rs") {
            return Ok(Self::File {
                arg: arg.to_string(),
                path: dir.join(arg),
            });
        }

        let path = dir.join(arg);
        let looks_like_path = arg.starts_with('.')
            || arg.contains(['/', '\\'])
            || arg.ends_with("Cargo.toml")
            || path.is_dir();
        if looks_like_path {
            let manifest = if path.is_dir() {
                path.join("Cargo.toml")
            } else {
                path
            };
            if !manifest.is_file() {
                return Err(invalid(format!("no manifest at {}", manifest.display())));
            }
            return Ok(Self::Local {
                arg: arg.to_string(),
                manifest,
            });
        }

        let (name, req) = match arg.split_once('@') {
            Some((name, req)) => (name, req),
            None => (arg, "*"),
        };
        if let Err(reason) = check_crate_name(name) {
            return Err(invalid(reason.into()));
        }
        let req = semver::VersionReq::parse(req)
            .map_err(|e| invalid(format!("version requirement {req:?}: {e}")))?;
        Ok(Self::Registry {
            name: name.to_string(),
            req,
        })
    }

    /// How the spec is shown in the file description.
    pub fn display_name(&self) -> &str {
        match self {
            Self::File { arg, .. } => arg.strip_suffix(".rs").unwrap_or(arg),
            Self::Local { arg, .. } => arg,
            Self::Registry { name, .. } => name,
        }
    }
}

fn check_crate_name(name: &str) -> Result<(), &'static str> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Err("empty crate name"),
        Some(c) if !c.is_ascii_alphabetic() => {
            return Err("crate name must start with a letter");
        }
        Some(_) => {}
    }
    if name.len() > 64 {
        return Err("crate name longer than 64 characters");
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err("crate name may only contain letters, digits, '-' and '_'");
    }
    Ok(())
}

/// A parsed command line.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub arch: Arch,
    /// `KEY=VALUE` overrides, in order.
    pub env: Vec<(String, String)>,
    pub output: PathBuf,
    /// Flags passed through to `cargo build`.
    pub cargo_flags: Vec<String>,
    /// Plugins in command-line order.
    pub specs: Vec<Spec>,
}

impl Invocation {
    /// Parse the arguments following the arch. `dir` is the directory relative
    /// paths are resolved against.
    pub fn parse(arch: &str, args: &[String], dir: &Path) -> Result<Self, BuildError> {
        let arch: Arch = arch.parse()?;

        let mut rest = args;
        let mut env = Vec::new();
        while let Some((first, tail)) = rest.split_first() {
            if first.starts_with('-') {
                break;
            }
            let Some((key, value)) = first.split_once('=') else {
                break;
            };
            let reason = if key.is_empty() {
                Some("empty key")
            } else if key.contains('\0') || value.contains('\0') {
                Some("contains a NUL character")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(BuildError::InvalidEnv {
                    arg: first.clone(),
                    reason,
                });
            }
            env.push((key.to_string(), value.to_string()));
            rest = tail;
        }

        let mut output = None;
        let mut remaining = Vec::with_capacity(rest.len());
        let mut iter = rest.iter();
        while let Some(arg) = iter.next() {
            if let Some(value) = arg.strip_prefix("-o=") {
                if value.is_empty() {
                    return Err(BuildError::MissingOutput);
                }
                output = Some(PathBuf::from(value));
            } else if arg == "-o" {
                match iter.next() {
                    Some(value) if !value.is_empty() => output = Some(PathBuf::from(value)),
                    _ => return Err(BuildError::MissingOutput),
                }
            } else {
                remaining.push(arg.clone());
            }
        }

        let split = remaining
            .iter()
            .rposition(|arg| arg.starts_with('-'))
            .map_or(0, |i| i + 1);
        let mut specs = Vec::with_capacity(remaining.len() - split);
        for (i, arg) in remaining.iter().enumerate().skip(split) {
            let spec = Spec::parse(arg, dir)?;
            if let Spec::File { path, .. } = &spec {
                if let Err(source) = std::fs::metadata(path) {
                    return Err(BuildError::InaccessibleFile {
                        path: path.clone(),
                        source,
                        after_flag: i > 0 && remaining[i - 1].starts_with('-'),
                    });
                }
            }
            specs.push(spec);
        }
        remaining.truncate(split);

        Ok(Self {
            arch,
            env,
            output: output.unwrap_or_else(|| arch.default_output()),
            cargo_flags: remaining,
            specs,
        })
    }
}

/// True if any argument asks for help.
pub fn wants_help(args: &[String]) -> bool {
    args.is_empty()
        || args
            .iter()
            .any(|a| matches!(a.as_str(), "-h" | "--help" | "-help"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn arch_values() {
        assert_eq!("64".parse::<Arch>().unwrap(), Arch::X64);
        assert_eq!("32".parse::<Arch>().unwrap(), Arch::X86);
        assert_eq!("ARM64".parse::<Arch>().unwrap(), Arch::Arm64);
        let err = "arm64".parse::<Arch>().unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(Arch::Arm64.default_output(), PathBuf::from("rs7zPluginARM64.dll"));
        assert_eq!(Arch::X86.target_triple(), "i686-pc-windows-msvc");
    }

    #[test]
    fn full_command_line() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "").unwrap();
        fs::write(dir.path().join("b.rs"), "").unwrap();

        let inv = Invocation::parse(
            "64",
            &args(&["RUSTFLAGS=-Copt-level=2", "CC=", "-o", "x.dll", "--release", "b.rs", "a.rs"]),
            dir.path(),
        )
        .unwrap();

        assert_eq!(
            inv.env,
            vec![
                ("RUSTFLAGS".to_string(), "-Copt-level=2".to_string()),
                ("CC".to_string(), String::new()),
            ]
        );
        assert_eq!(inv.output, PathBuf::from("x.dll"));
        assert_eq!(inv.cargo_flags, args(&["--release"]));
        let names: Vec<_> = inv.specs.iter().map(Spec::display_name).collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn output_flag_forms() {
        let dir = tempfile::tempdir().unwrap();
        let inv = Invocation::parse("32", &args(&["-o=out.dll"]), dir.path()).unwrap();
        assert_eq!(inv.output, PathBuf::from("out.dll"));
        assert!(inv.specs.is_empty());

        let inv = Invocation::parse("32", &[], dir.path()).unwrap();
        assert_eq!(inv.output, PathBuf::from("rs7zPlugin32.dll"));

        for bad in [&["-o"][..], &["-o="][..]] {
            let err = Invocation::parse("32", &args(bad), dir.path()).unwrap_err();
            assert!(matches!(err, BuildError::MissingOutput));
        }
    }

    #[test]
    fn invalid_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let err = Invocation::parse("64", &args(&["=x"]), dir.path()).unwrap_err();
        assert!(matches!(err, BuildError::InvalidEnv { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn missing_file_after_flag_gets_hint() {
        let dir = tempfile::tempdir().unwrap();
        let err = Invocation::parse("64", &args(&["--features", "nope.rs"]), dir.path())
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::InaccessibleFile {
                after_flag: true,
                ..
            }
        ));
        assert!(err.note().is_some());

        let err = Invocation::parse("64", &args(&["nope.rs"]), dir.path()).unwrap_err();
        assert!(err.note().is_none());
    }

    #[test]
    fn registry_specs() {
        let dir = tempfile::tempdir().unwrap();
        match Spec::parse("vpk-7z@^0.3", dir.path()).unwrap() {
            Spec::Registry { name, req } => {
                assert_eq!(name, "vpk-7z");
                assert_eq!(req.to_string(), "^0.3");
            }
            other => panic!("unexpected {other:?}"),
        }
        match Spec::parse("vpk", dir.path()).unwrap() {
            Spec::Registry { req, .. } => assert_eq!(req, semver::VersionReq::STAR),
            other => panic!("unexpected {other:?}"),
        }
        assert!(Spec::parse("9lives", dir.path()).is_err());
        assert!(Spec::parse("vpk@not a version", dir.path()).is_err());
    }

    #[test]
    fn local_specs() {
        let dir = tempfile::tempdir().unwrap();
        let krate = dir.path().join("fmt");
        fs::create_dir(&krate).unwrap();
        assert!(Spec::parse("fmt", dir.path()).is_err());

        fs::write(krate.join("Cargo.toml"), "[package]\nname = \"fmt\"\n").unwrap();
        assert_eq!(
            Spec::parse("fmt", dir.path()).unwrap(),
            Spec::Local {
                arg: "fmt".into(),
                manifest: krate.join("Cargo.toml"),
            }
        );
    }

    #[test]
    fn help_anywhere() {
        assert!(wants_help(&[]));
        assert!(wants_help(&args(&["64", "--release", "-help"])));
        assert!(!wants_help(&args(&["64", "-o=h"])));
    }
}
