use std::io::Write;

use ncagg::data_type::DataType;
use ncagg::dataset::{
    AggregationDataset, DatasetError, DatasetFormat, DatasetOptions, VariableSpec,
};

#[test]
fn v0_5_with_classic_format_is_rejected() {
    let err = AggregationDataset::create(
        "/tmp/unused.nc",
        DatasetFormat::AggregatedClassic,
        "0.5",
        DatasetOptions::new(),
    )
    .unwrap_err();
    assert!(matches!(err, DatasetError::FormatMismatch(_)), "{err}");

    let err = AggregationDataset::create(
        "/tmp/unused.nc",
        DatasetFormat::Classic,
        "0.5",
        DatasetOptions::new(),
    )
    .unwrap_err();
    assert!(matches!(err, DatasetError::FormatMismatch(_)), "{err}");
}

#[test]
fn magic_mismatch_is_not_a_recognised_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("archive.zip");
    std::fs::File::create(&path)?.write_all(b"PK\x03\x04hi there")?;

    let err = AggregationDataset::open(
        path.to_str().unwrap(),
        "r",
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new(),
    )
    .unwrap_err();
    assert!(matches!(err, DatasetError::NotARecognisedFile(_)), "{err}");
    Ok(())
}

#[test]
fn append_mode_is_rejected() {
    let err = AggregationDataset::open(
        "/tmp/unused.nc",
        "a",
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new(),
    )
    .unwrap_err();
    assert!(matches!(err, DatasetError::ApiMisuse(_)), "{err}");
}

#[test]
fn unknown_convention_version_is_rejected() {
    assert!(AggregationDataset::create(
        "/tmp/unused.nc",
        DatasetFormat::Default,
        "0.6",
        DatasetOptions::new(),
    )
    .is_err());
}

#[test]
fn clobber_guard() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("master.nc");
    std::fs::File::create(&path)?.write_all(b"CDF\x01")?;

    let err = AggregationDataset::create(
        path.to_str().unwrap(),
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new().with_clobber(false),
    )
    .unwrap_err();
    assert!(matches!(err, DatasetError::ApiMisuse(_)), "{err}");
    Ok(())
}

#[test]
fn creation_misuse() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::TempDir::new()?;
    let master_uri = dir.path().join("m.nc").to_str().unwrap().to_string();
    let mut dataset = AggregationDataset::create(
        &master_uri,
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new(),
    )?;
    dataset.create_dimension("", "x", Some(4))?;
    dataset.create_dimension("", "time", None)?;

    // Unknown dimension.
    assert!(dataset
        .create_variable("", "v", DataType::Float32, &["missing"], &VariableSpec::new())
        .is_err());

    // Name collision.
    dataset.create_variable("", "v", DataType::Float32, &["x"], &VariableSpec::new())?;
    let err = dataset
        .create_variable("", "v", DataType::Float32, &["x"], &VariableSpec::new())
        .unwrap_err();
    assert!(matches!(err, DatasetError::ApiMisuse(_)), "{err}");

    // Partitioned variables cannot use an unlimited dimension.
    let err = dataset
        .create_variable(
            "",
            "p",
            DataType::Float32,
            &["time", "x"],
            &VariableSpec::new().with_subarray_shape(vec![1, 2]),
        )
        .unwrap_err();
    assert!(matches!(err, DatasetError::ApiMisuse(_)), "{err}");

    // An unlimited dimension must come first.
    let err = dataset
        .create_variable("", "q", DataType::Float32, &["x", "time"], &VariableSpec::new())
        .unwrap_err();
    assert!(matches!(err, DatasetError::ApiMisuse(_)), "{err}");

    // A tile shape that exceeds the variable is a partitioning failure.
    let err = dataset
        .create_variable(
            "",
            "r",
            DataType::Float32,
            &["x"],
            &VariableSpec::new().with_subarray_shape(vec![9]),
        )
        .unwrap_err();
    assert!(matches!(err, DatasetError::Partitioning(_)), "{err}");

    dataset.close()?;
    Ok(())
}

#[test]
fn writes_rejected_in_read_mode() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::TempDir::new()?;
    let master_uri = dir.path().join("m.nc").to_str().unwrap().to_string();
    let mut dataset = AggregationDataset::create(
        &master_uri,
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new(),
    )?;
    dataset.create_dimension("", "x", Some(2))?;
    dataset.create_variable("", "v", DataType::Int32, &["x"], &VariableSpec::new())?;
    dataset.close()?;

    let mut dataset = AggregationDataset::open(
        &master_uri,
        "r",
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new(),
    )?;
    let err = dataset
        .write_elements("v", &ncagg::hyperslab::Hyperslab::full(1), &[1i32, 2])
        .unwrap_err();
    assert!(matches!(err, DatasetError::ApiMisuse(_)), "{err}");
    assert!(dataset.create_dimension("", "y", Some(2)).is_err());
    dataset.close()?;
    Ok(())
}

#[test]
fn element_type_guard() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::TempDir::new()?;
    let master_uri = dir.path().join("m.nc").to_str().unwrap().to_string();
    let mut dataset = AggregationDataset::create(
        &master_uri,
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new(),
    )?;
    dataset.create_dimension("", "x", Some(2))?;
    dataset.create_variable("", "v", DataType::Float32, &["x"], &VariableSpec::new())?;
    assert!(dataset
        .write_elements("v", &ncagg::hyperslab::Hyperslab::full(1), &[1i32, 2])
        .is_err());
    dataset.close()?;
    Ok(())
}
