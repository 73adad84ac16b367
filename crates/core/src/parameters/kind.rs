use super::ElastixParameters;
use crate::{RegistrationError, RegistrationResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const RIGID_TEMPLATE: &str = include_str!("../../templates/registration/rigid.txt");
const AFFINE_TEMPLATE: &str = include_str!("../../templates/registration/affine.txt");
const BSPLINE_TEMPLATE: &str = include_str!("../../templates/registration/bspline.txt");

/// Class of geometric transform elastix optimises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    #[default]
    Rigid,
    Affine,
    BSpline,
}

impl TransformKind {
    pub const ALL: [TransformKind; 3] = [
        TransformKind::Rigid,
        TransformKind::Affine,
        TransformKind::BSpline,
    ];

    /// Text of the embedded default parameter file.
    pub fn template(self) -> &'static str {
        match self {
            TransformKind::Rigid => RIGID_TEMPLATE,
            TransformKind::Affine => AFFINE_TEMPLATE,
            TransformKind::BSpline => BSPLINE_TEMPLATE,
        }
    }

    pub fn default_parameters(self) -> RegistrationResult<ElastixParameters> {
        ElastixParameters::parse(self.template())
    }

    /// Value of the elastix `Transform` entry for this kind.
    pub fn elastix_transform(self) -> &'static str {
        match self {
            TransformKind::Rigid => "EulerTransform",
            TransformKind::Affine => "AffineTransform",
            TransformKind::BSpline => "BSplineTransform",
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformKind::Rigid => write!(f, "rigid"),
            TransformKind::Affine => write!(f, "affine"),
            TransformKind::BSpline => write!(f, "bspline"),
        }
    }
}

impl FromStr for TransformKind {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rigid" => Ok(TransformKind::Rigid),
            "affine" => Ok(TransformKind::Affine),
            "bspline" | "nonrigid" => Ok(TransformKind::BSpline),
            other => Err(RegistrationError::InvalidInput(format!(
                "unknown transform type '{other}' (expected rigid, affine or bspline)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_nonrigid_alias() {
        assert_eq!("rigid".parse::<TransformKind>().unwrap(), TransformKind::Rigid);
        assert_eq!(" Affine ".parse::<TransformKind>().unwrap(), TransformKind::Affine);
        assert_eq!("BSpline".parse::<TransformKind>().unwrap(), TransformKind::BSpline);
        assert_eq!("nonrigid".parse::<TransformKind>().unwrap(), TransformKind::BSpline);
        assert!(matches!(
            "demons".parse::<TransformKind>(),
            Err(RegistrationError::InvalidInput(_))
        ));
    }

    #[test]
    fn embedded_defaults_parse_and_share_metric_and_optimizer() {
        for kind in TransformKind::ALL {
            let params = kind.default_parameters().unwrap();
            assert_eq!(params.text("Transform"), Some(kind.elastix_transform()));
            assert_eq!(params.text("Metric"), Some("AdvancedMattesMutualInformation"));
            assert_eq!(
                params.text("Optimizer"),
                Some("AdaptiveStochasticGradientDescent")
            );
            assert_eq!(params.number("NumberOfResolutions"), Some(3.0));
            assert_eq!(params.text("ResultImageFormat"), Some("nii.gz"));
        }
    }

    #[test]
    fn bspline_grid_is_refined_from_coarse_to_final_spacing() {
        let params = TransformKind::BSpline.default_parameters().unwrap();
        let schedule: Vec<String> = params
            .get("GridSpacingSchedule")
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(schedule, vec!["6", "4", "2"]);
        assert_eq!(params.number("FinalGridSpacingInPhysicalUnits"), Some(10.0));
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for kind in TransformKind::ALL {
            assert_eq!(kind.to_string().parse::<TransformKind>().unwrap(), kind);
        }
    }
}
