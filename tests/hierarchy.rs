use ncagg::data_type::{AttrValue, DataType};
use ncagg::dataset::{AggregationDataset, DatasetFormat, DatasetOptions, VariableSpec};
use ncagg::hyperslab::Hyperslab;

#[test]
fn nested_groups_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::TempDir::new()?;
    let master_uri = dir.path().join("m.nc").to_str().unwrap().to_string();

    let mut dataset = AggregationDataset::create(
        &master_uri,
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new(),
    )?;
    dataset.create_group("forecast/model")?;
    dataset.create_dimension("", "x", Some(4))?;
    dataset.create_dimension("forecast/model", "level", Some(2))?;
    // Dimensions resolve through ancestor groups.
    dataset.create_variable(
        "forecast/model",
        "t",
        DataType::Float32,
        &["level", "x"],
        &VariableSpec::new().with_subarray_shape(vec![1, 2]),
    )?;
    dataset.write_elements(
        "forecast/model/t",
        &Hyperslab::full(2),
        &[0.5f32; 8],
    )?;
    dataset
        .group_mut("forecast")
        .unwrap()
        .attributes_mut()
        .insert("institution".to_string(), AttrValue::from("ncagg"));
    dataset.close()?;

    let mut dataset = AggregationDataset::open(
        &master_uri,
        "r",
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new(),
    )?;
    assert_eq!(
        dataset.group("forecast").unwrap().attributes().get("institution"),
        Some(&AttrValue::from("ncagg"))
    );
    // The root group is synthetic and always present; paths may name it explicitly.
    assert!(dataset.group("root/forecast/model").is_some());
    let values: Vec<f32> =
        dataset.read_elements("forecast/model/t", &Hyperslab::full(2))?;
    assert_eq!(values, vec![0.5; 8]);
    Ok(())
}

#[test]
fn attribute_overlay_and_backing_fallback() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::TempDir::new()?;
    let master_uri = dir.path().join("m.nc").to_str().unwrap().to_string();

    let mut dataset = AggregationDataset::create(
        &master_uri,
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new(),
    )?;
    dataset.create_dimension("", "x", Some(4))?;
    dataset.create_variable(
        "",
        "t",
        DataType::Float32,
        &["x"],
        &VariableSpec::new().with_subarray_shape(vec![2]),
    )?;

    // Attribute set is idempotent.
    dataset.set_variable_attribute("t", "units", AttrValue::from("K"))?;
    dataset.set_variable_attribute("t", "units", AttrValue::from("K"))?;
    assert_eq!(
        dataset.variable_attribute("t", "units")?,
        Some(AttrValue::from("K"))
    );
    assert_eq!(
        dataset.root().variable("t").unwrap().attributes().len(),
        1
    );
    assert!(dataset.delete_variable_attribute("t", "units")?);
    assert!(!dataset.delete_variable_attribute("t", "units")?);
    dataset.set_variable_attribute("t", "units", AttrValue::from("K"))?;
    dataset.close()?;

    let dataset = AggregationDataset::open(
        &master_uri,
        "r",
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new(),
    )?;
    // User attributes come back through the overlay.
    assert_eq!(
        dataset.variable_attribute("t", "units")?,
        Some(AttrValue::from("K"))
    );
    // Convention attributes are not part of the overlay but are reachable through the
    // backing-file fallback.
    assert!(dataset.root().variable("t").unwrap().attribute("cfa_array").is_none());
    assert_eq!(
        dataset.variable_attribute("t", "cfa_array")?,
        Some(AttrValue::Int(1))
    );
    assert_eq!(dataset.variable_attribute("t", "missing")?, None);
    Ok(())
}

#[test]
fn rename_variable_serialises_on_close() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::TempDir::new()?;
    let master_uri = dir.path().join("m.nc").to_str().unwrap().to_string();

    let mut dataset = AggregationDataset::create(
        &master_uri,
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new(),
    )?;
    dataset.create_dimension("", "x", Some(4))?;
    dataset.create_variable(
        "",
        "t",
        DataType::Float32,
        &["x"],
        &VariableSpec::new().with_subarray_shape(vec![2]),
    )?;
    dataset.write_elements("t", &Hyperslab::full(1), &[1.0f32; 4])?;
    dataset.rename_variable("t", "temperature")?;
    dataset.close()?;

    // The subarray files keep the original field name; the descriptor records it.
    assert!(dir.path().join("m/t.0.nc").is_file());

    let mut dataset = AggregationDataset::open(
        &master_uri,
        "r",
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new(),
    )?;
    assert!(dataset.root().variable("t").is_none());
    let values: Vec<f32> = dataset.read_elements("temperature", &Hyperslab::full(1))?;
    assert_eq!(values, vec![1.0; 4]);
    Ok(())
}

#[test]
fn unlimited_dimension_grows_classical_variables() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::TempDir::new()?;
    let master_uri = dir.path().join("m.nc").to_str().unwrap().to_string();

    let mut dataset = AggregationDataset::create(
        &master_uri,
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new(),
    )?;
    dataset.create_dimension("", "time", None)?;
    dataset.create_dimension("", "x", Some(2))?;
    dataset.create_variable("", "t", DataType::Int32, &["time", "x"], &VariableSpec::new())?;

    dataset.write_elements(
        "t",
        &Hyperslab::from_ranges(&[0..2, 0..2]),
        &[1i32, 2, 3, 4],
    )?;
    assert_eq!(dataset.root().dimension("time").unwrap().len(), 2);
    dataset.write_elements("t", &Hyperslab::from_ranges(&[3..4, 0..2]), &[9i32, 9])?;
    assert_eq!(dataset.root().dimension("time").unwrap().len(), 4);

    // The skipped record row reads as fill.
    let values: Vec<i32> = dataset.read_elements("t", &Hyperslab::full(2))?;
    assert_eq!(&values[..4], &[1, 2, 3, 4]);
    assert_eq!(&values[6..], &[9, 9]);
    let fill = dataset.root().variable("t").unwrap().fill_value().clone();
    assert!(fill.equals_all(ncagg::data_type::elements_to_bytes(&values[4..6]).as_slice()));
    dataset.close()?;

    let mut dataset = AggregationDataset::open(
        &master_uri,
        "r",
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new(),
    )?;
    assert!(dataset.root().dimension("time").unwrap().is_unlimited());
    assert_eq!(dataset.root().dimension("time").unwrap().len(), 4);
    let values: Vec<i32> = dataset.read_elements("t", &Hyperslab::from_ranges(&[0..2, 0..2]))?;
    assert_eq!(values, vec![1, 2, 3, 4]);
    Ok(())
}

#[test]
fn wildcard_listing() -> Result<(), Box<dyn std::error::Error>> {
    use ncagg::uri::Uri;

    let dir = tempfile::TempDir::new()?;
    for name in ["run1.nc", "run2.nc", "notes.txt"] {
        std::fs::write(dir.path().join(name), b"CDF\x01")?;
    }
    let pattern = Uri::new(&format!("{}/run?.nc", dir.path().display()))?;
    let matches = AggregationDataset::list(&pattern, None)?;
    assert_eq!(matches.len(), 2);
    assert!(matches.iter().all(|uri| uri.as_str().ends_with(".nc")));
    Ok(())
}
