//! Test doubles shared by the module tests.

use crate::tool::{Tool, ToolInvocation, ToolOutput, ToolRunner};
use crate::RegistrationResult;
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

/// Stands in for elastix and transformix by writing the artefacts they would.
///
/// Elastix writes `TransformParameters.0.txt` into `-out`; transformix copies
/// its `-in` image to `<-out>/result.nii.gz` and writes `transformix.log`.
#[derive(Default)]
pub(crate) struct FakeElastix {
    pub calls: RefCell<Vec<ToolInvocation>>,
    pub elastix_exit: i32,
    pub transformix_exit: i32,
    pub skip_transform_parameters: bool,
    pub skip_result: bool,
    /// Elastix fails when the moving image path contains this text.
    pub fail_moving: Option<String>,
}

impl FakeElastix {
    pub fn calls_for(&self, tool: Tool) -> Vec<ToolInvocation> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.tool == tool)
            .cloned()
            .collect()
    }

    fn failed(exit_code: i32, stderr: &str) -> ToolOutput {
        ToolOutput {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

impl ToolRunner for FakeElastix {
    fn run(&self, invocation: &ToolInvocation) -> RegistrationResult<ToolOutput> {
        self.calls.borrow_mut().push(invocation.clone());
        let out_dir = invocation
            .flag_value("-out")
            .map(PathBuf::from)
            .unwrap_or_default();

        match invocation.tool {
            Tool::Elastix => {
                let moving = invocation
                    .flag_value("-m")
                    .map(|m| m.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let forced = self
                    .fail_moving
                    .as_deref()
                    .is_some_and(|needle| moving.contains(needle));
                if forced {
                    return Ok(Self::failed(1, "itk::ExceptionObject: too many samples map outside moving image buffer"));
                }
                if self.elastix_exit != 0 {
                    return Ok(Self::failed(self.elastix_exit, "elastix error"));
                }
                if !self.skip_transform_parameters {
                    fs::write(
                        out_dir.join("TransformParameters.0.txt"),
                        "(Transform \"EulerTransform\")\n",
                    )
                    .unwrap();
                }
                Ok(ToolOutput {
                    exit_code: 0,
                    stdout: "Total time elapsed: 1.2s".into(),
                    stderr: String::new(),
                })
            }
            Tool::Transformix => {
                if self.transformix_exit != 0 {
                    return Ok(Self::failed(self.transformix_exit, "transformix error"));
                }
                if !self.skip_result {
                    let input = invocation.flag_value("-in").map(PathBuf::from);
                    let result = out_dir.join("result.nii.gz");
                    let copied = input.map(|i| fs::copy(i, &result).is_ok());
                    if copied != Some(true) {
                        fs::write(&result, b"").unwrap();
                    }
                }
                fs::write(out_dir.join("transformix.log"), "transformix done").unwrap();
                Ok(ToolOutput {
                    exit_code: 0,
                    stdout: "Transformix has finished".into(),
                    stderr: String::new(),
                })
            }
        }
    }
}

/// Creates `<base>/<id>/` with empty `<id>_adc.nii.gz` / `<id>_t2w.nii.gz` as requested.
pub(crate) fn write_patient(base: &Path, id: &str, adc: bool, t2w: bool) -> PathBuf {
    let dir = base.join(id);
    fs::create_dir_all(&dir).unwrap();
    if adc {
        fs::write(dir.join(format!("{id}_adc.nii.gz")), b"").unwrap();
    }
    if t2w {
        fs::write(dir.join(format!("{id}_t2w.nii.gz")), b"").unwrap();
    }
    dir
}
