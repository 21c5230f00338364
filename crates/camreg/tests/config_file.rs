use std::error::Error;
use std::io::Write;

use camreg::k3d::Pose;
use camreg::{ConfigError, Estimator, EstimatorConfig};

#[test]
fn load_from_file() -> Result<(), Box<dyn Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        r#"{{
            "pnpIterations": 250,
            "pnpReprojectionError": 4.0,
            "random_seed": 3,
            "enable_features_memory": true,
            "feature_memory": {{ "capacity": 64 }}
        }}"#
    )?;

    let config = EstimatorConfig::from_json_file(file.path())?;
    assert_eq!(config.pnp_iterations, 250);
    assert_eq!(config.pnp_reprojection_error, 4.0);
    assert_eq!(config.random_seed, Some(3));
    assert_eq!(config.feature_memory.capacity, 64);
    assert_eq!(config.feature_memory.background_tolerance_mm, 100);

    let est = Estimator::new("phone", "fixed_camera", Pose::IDENTITY, config, None)?;
    assert!(est.memory().is_some());
    assert_eq!(est.device_id(), "phone");
    assert_eq!(est.fixed_camera_name(), "fixed_camera");
    Ok(())
}

#[test]
fn missing_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let result = EstimatorConfig::from_json_file(dir.path().join("absent.json"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn invalid_value_in_file() -> Result<(), Box<dyn Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(file, r#"{{ "orbLevelsNumber": 0 }}"#)?;
    let result = EstimatorConfig::from_json_file(file.path());
    assert!(matches!(
        result,
        Err(ConfigError::InvalidValue {
            name: "orb_levels_number",
            ..
        })
    ));
    Ok(())
}
