//! Elastix installation discovery and the elastix/transformix command lines.

use crate::constants::VERIFY_TIMEOUT;
use crate::tool::{Tool, ToolInvocation, ToolRunner};
use crate::{RegistrationError, RegistrationResult};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Locations of the elastix executables and their shared libraries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElastixInstallation {
    elastix: PathBuf,
    transformix: PathBuf,
    library_dir: Option<PathBuf>,
}

impl ElastixInstallation {
    pub fn new(elastix: PathBuf, transformix: PathBuf, library_dir: Option<PathBuf>) -> Self {
        Self {
            elastix,
            transformix,
            library_dir,
        }
    }

    /// Layout of an installation rooted at `base`.
    pub fn from_base(base: &Path) -> Self {
        let (elastix, transformix) = if cfg!(windows) {
            (base.join("elastix.exe"), base.join("transformix.exe"))
        } else {
            (
                base.join("bin").join("elastix"),
                base.join("bin").join("transformix"),
            )
        };
        let lib = base.join("lib");
        Self {
            elastix,
            transformix,
            library_dir: (!cfg!(windows) && lib.is_dir()).then_some(lib),
        }
    }

    /// Uses `override_dir` when given, otherwise the first platform default
    /// directory that contains an elastix executable.
    pub fn resolve(override_dir: Option<&Path>) -> RegistrationResult<Self> {
        let candidates = match override_dir {
            Some(dir) => vec![dir.to_path_buf()],
            None => candidate_dirs(),
        };

        for base in &candidates {
            let installation = Self::from_base(base);
            if installation.elastix.is_file() {
                tracing::info!("using elastix installation at {}", base.display());
                return Ok(installation);
            }
            tracing::debug!("no elastix executable under {}", base.display());
        }

        Err(RegistrationError::InstallationNotFound {
            searched: candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    pub fn elastix(&self) -> &Path {
        &self.elastix
    }

    pub fn transformix(&self) -> &Path {
        &self.transformix
    }

    pub fn library_dir(&self) -> Option<&Path> {
        self.library_dir.as_deref()
    }

    /// Environment additions that let the executables find their libraries.
    pub fn environment(&self) -> Vec<(OsString, OsString)> {
        let Some(lib) = &self.library_dir else {
            return Vec::new();
        };
        let var = if cfg!(target_os = "macos") {
            "DYLD_LIBRARY_PATH"
        } else if cfg!(target_os = "linux") {
            "LD_LIBRARY_PATH"
        } else {
            return Vec::new();
        };
        vec![(
            var.into(),
            prepend_library_path(lib, std::env::var_os(var)),
        )]
    }

    /// Runs `elastix --help` to confirm the executable works.
    pub fn verify(&self, runner: &dyn ToolRunner) -> RegistrationResult<()> {
        let invocation = ToolInvocation::new(Tool::Elastix, &self.elastix, VERIFY_TIMEOUT)
            .arg("--help")
            .envs(self.environment());

        let reason = match runner.run(&invocation) {
            Ok(output) if output.success() => return Ok(()),
            Ok(output) => format!("--help exited with code {}", output.exit_code),
            Err(e) => e.to_string(),
        };
        Err(RegistrationError::ToolNotExecutable {
            path: self.elastix.clone(),
            reason,
        })
    }

    /// `elastix -f <fixed> -m <moving> -p <params> -out <dir> [-fMask <mask>]`
    pub fn elastix_command(
        &self,
        fixed: &Path,
        moving: &Path,
        parameter_file: &Path,
        output_dir: &Path,
        fixed_mask: Option<&Path>,
        timeout: Duration,
    ) -> ToolInvocation {
        let invocation = ToolInvocation::new(Tool::Elastix, &self.elastix, timeout)
            .flag("-f", fixed)
            .flag("-m", moving)
            .flag("-p", parameter_file)
            .flag("-out", output_dir)
            .envs(self.environment());
        match fixed_mask {
            Some(mask) => invocation.flag("-fMask", mask),
            None => invocation,
        }
    }

    /// `transformix -in <moving> -out <dir> -tp <TransformParameters.0.txt>`
    pub fn transformix_command(
        &self,
        moving: &Path,
        output_dir: &Path,
        transform_parameters: &Path,
        timeout: Duration,
    ) -> ToolInvocation {
        ToolInvocation::new(Tool::Transformix, &self.transformix, timeout)
            .flag("-in", moving)
            .flag("-out", output_dir)
            .flag("-tp", transform_parameters)
            .envs(self.environment())
    }
}

/// Default installation directories for the current platform.
pub fn candidate_dirs() -> Vec<PathBuf> {
    if cfg!(windows) {
        return vec![
            PathBuf::from(r"C:\Program Files\elastix"),
            PathBuf::from(r"C:\elastix"),
        ];
    }

    let mut dirs = vec![
        PathBuf::from("/usr/local/elastix"),
        PathBuf::from("/opt/elastix"),
        PathBuf::from("/usr"),
    ];
    if cfg!(target_os = "macos") {
        if let Some(home) = std::env::var_os("HOME") {
            dirs.push(PathBuf::from(home).join("elastix-5"));
        }
    }
    dirs
}

fn prepend_library_path(lib: &Path, existing: Option<OsString>) -> OsString {
    let mut value = lib.as_os_str().to_os_string();
    if let Some(existing) = existing.filter(|e| !e.is_empty()) {
        value.push(":");
        value.push(existing);
    }
    value
}
