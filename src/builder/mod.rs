//! Bundles plugin crates and standalone modules into one 7-Zip format
//! library: generates a `cdylib` crate in a scratch directory, builds it with
//! cargo for a Windows target, and copies out the DLL.

pub mod args;
pub mod env;
pub mod error;
pub mod generate;
pub mod resolve;
pub mod versioninfo;

use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

pub use args::{Arch, Invocation, Spec};
pub use env::BuildEnv;
pub use error::BuildError;
pub use resolve::Plugin;

use generate::{BaseCrate, LIB_NAME, RESOURCE_FILE};
use versioninfo::VersionInfo;

/// Scratch directory, created next to where the tool runs.
pub const BUILD_DIR: &str = "sevenzip-plugins-build";

/// Run a build. Resolves `cancel` to abort; running cargo processes are
/// killed and the scratch directory is removed.
pub async fn run(
    inv: Invocation,
    env: BuildEnv,
    cwd: &Path,
    cancel: impl Future<Output = ()>,
) -> Result<(), BuildError> {
    tokio::select! {
        biased;
        _ = cancel => Err(BuildError::Interrupted),
        result = build(&inv, &env, cwd) => result,
    }
}

async fn build(inv: &Invocation, env: &BuildEnv, cwd: &Path) -> Result<(), BuildError> {
    print_toolchain(env).await?;
    if !env.overrides().is_empty() {
        println!("environment overrides");
        for (key, value) in env.overrides() {
            println!("  {}", quote(&format!("{key}={value}")));
        }
        println!();
    }

    let plugins = resolve::resolve(&inv.specs, env).await?;
    let names: Vec<&str> = plugins.iter().map(Plugin::display_name).collect();
    let time = env.build_time()?;
    let version = VersionInfo::new(inv.arch, time, env.ci().as_ref(), &names);

    let dir = ScratchDir::create(cwd.join(BUILD_DIR))?;
    println!("in {}", dir.path().display());
    println!();
    write_sources(dir.path(), &plugins, &version, &BaseCrate::locate(env))?;

    let output = cwd.join(&inv.output);
    let target_dir = env
        .get("CARGO_TARGET_DIR")
        .filter(|d| !d.is_empty())
        .map_or_else(|| dir.path().join("target"), |d| cwd.join(d));

    let mut cmd = Command::new(env.cargo());
    cmd.args(["build", "--lib", "--target", inv.arch.target_triple()])
        .arg("--target-dir")
        .arg(&target_dir)
        .args(&inv.cargo_flags)
        .current_dir(dir.path())
        .envs(env.overrides().iter().cloned())
        .stdin(Stdio::null())
        .kill_on_drop(true);
    println!("{}", command_line(&cmd));
    println!();

    let status = cmd
        .status()
        .await
        .map_err(|e| BuildError::io(format!("run {}", env.cargo()), e))?;
    if !status.success() {
        return Err(BuildError::BuildFailed(status.code().unwrap_or(1)));
    }

    let artifact = target_dir
        .join(inv.arch.target_triple())
        .join(profile_dir(&inv.cargo_flags))
        .join(format!("{LIB_NAME}.dll"));
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| BuildError::io(format!("create {}", parent.display()), e))?;
    }
    fs::copy(&artifact, &output).map_err(|e| {
        BuildError::io(
            format!("copy {} to {}", artifact.display(), output.display()),
            e,
        )
    })?;
    println!();
    println!("wrote {}", output.display());
    Ok(())
}

async fn print_toolchain(env: &BuildEnv) -> Result<(), BuildError> {
    let output = Command::new(env.cargo())
        .arg("-vV")
        .envs(env.overrides().iter().cloned())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| BuildError::Toolchain(format!("run {} -vV: {e}", env.cargo())))?;
    if !output.status.success() {
        return Err(BuildError::Toolchain(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    println!("{} -vV", env.cargo());
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        println!("  {line}");
    }
    println!();
    Ok(())
}

/// Write every file of the generated crate into `dir`, printing each.
pub fn write_sources(
    dir: &Path,
    plugins: &[Plugin],
    version: &VersionInfo,
    base: &BaseCrate,
) -> Result<(), BuildError> {
    let src = dir.join("src");
    fs::create_dir(&src).map_err(|e| BuildError::io(format!("create {}", src.display()), e))?;
    create_file(&dir.join(".gitignore"), b"*\n")?;

    for plugin in plugins {
        if let Plugin::Module { module, source, .. } = plugin {
            let name = format!("{module}.rs");
            fs::copy(source, src.join(&name)).map_err(|e| {
                BuildError::io(format!("copy {}", source.display()), e)
            })?;
            println!("src/{name}");
            println!("  < {}", source.display());
            println!();
        }
    }

    let files = [
        ("Cargo.toml", generate::manifest(plugins, base)?),
        ("build.rs", generate::build_script()),
        ("src/lib.rs", generate::lib_source(plugins)),
    ];
    for (name, text) in &files {
        create_file(&dir.join(name), text.as_bytes())?;
        println!("{name}");
        print!("{}", generate::numbered(text));
        println!();
    }

    let res = version.to_res().map_err(|e| BuildError::Generate {
        what: RESOURCE_FILE,
        reason: e.to_string(),
    })?;
    create_file(&dir.join(RESOURCE_FILE), &res)?;
    println!("{RESOURCE_FILE}");
    for (i, (key, value)) in version.strings.fields().iter().enumerate() {
        if !value.is_empty() {
            println!("{:3} | {key:<16}   {value:?}", i + 1);
        }
    }
    println!();
    Ok(())
}

/// Create a file that must not exist yet.
fn create_file(path: &Path, contents: &[u8]) -> Result<(), BuildError> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .and_then(|mut f| f.write_all(contents))
        .map_err(|e| BuildError::io(format!("write {}", path.display()), e))
}

/// Output directory name for the profile selected by cargo flags.
fn profile_dir(flags: &[String]) -> String {
    let mut profile = "debug".to_string();
    let mut iter = flags.iter();
    while let Some(flag) = iter.next() {
        let named = if let Some(name) = flag.strip_prefix("--profile=") {
            Some(name.to_string())
        } else if flag == "--profile" {
            iter.next().cloned()
        } else if flag == "--release" || flag == "-r" {
            Some("release".to_string())
        } else {
            None
        };
        if let Some(name) = named {
            profile = match name.as_str() {
                "dev" | "test" => "debug".to_string(),
                "bench" => "release".to_string(),
                _ => name,
            };
        }
    }
    profile
}

fn quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
        arg.to_string()
    } else {
        format!("{arg:?}")
    }
}

fn command_line(cmd: &Command) -> String {
    let std = cmd.as_std();
    std::iter::once(std.get_program())
        .chain(std.get_args())
        .map(|a| quote(&a.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The scratch directory. It must not exist beforehand; it is removed on drop.
struct ScratchDir(PathBuf);

impl ScratchDir {
    fn create(path: PathBuf) -> Result<Self, BuildError> {
        fs::create_dir(&path)
            .map_err(|e| BuildError::io(format!("create build dir {}", path.display()), e))?;
        debug!(dir = %path.display(), "created build dir");
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.0) {
            warn!(dir = %self.0.display(), error = %e, "failed to remove build dir");
        }
    }
}
