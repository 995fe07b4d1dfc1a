use std::sync::Arc;

use ncagg::data_type::DataType;
use ncagg::dataset::{AggregationDataset, DatasetError, DatasetFormat, DatasetOptions, VariableSpec};
use ncagg::file_manager::FileManagerError;
use ncagg::hyperslab::Hyperslab;
use ncagg::storage::MemoryObjectStore;
use ncagg::variable::VariableError;

/// One 2x2 float32 tile is 16 bytes of payload.
const TILE_BYTES: u64 = 16;

#[test]
fn eviction_keeps_memory_bounded_and_tiles_durable() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryObjectStore::new());
    let master_uri = "s3://host/bucket/run/master.nc";
    let mut dataset = AggregationDataset::create(
        master_uri,
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new()
            .with_object_store(store.clone())
            .with_memory_limit(2 * TILE_BYTES),
    )?;
    dataset.create_dimension("", "x", Some(10))?;
    dataset.create_dimension("", "y", Some(2))?;
    dataset.create_variable(
        "",
        "t",
        DataType::Float32,
        &["x", "y"],
        &VariableSpec::new().with_subarray_shape(vec![2, 2]),
    )?;

    // Touch five tiles, one write per tile.
    for tile in 0..5u64 {
        let rows = tile * 2..tile * 2 + 2;
        dataset.write_elements(
            "t",
            &Hyperslab::from_ranges(&[rows, 0..2]),
            &[tile as f32; 4],
        )?;
    }

    assert!(dataset.file_manager().in_memory_bytes() <= 2 * TILE_BYTES);
    assert!(
        dataset.file_manager().peak_in_memory_bytes() <= 3 * TILE_BYTES,
        "peak {} exceeds cap + one tile",
        dataset.file_manager().peak_in_memory_bytes()
    );
    // Three tiles were already written back by eviction.
    assert!(store.list_matching("s3://host/bucket/run/master/t.*.nc").len() >= 3);

    dataset.close()?;

    // Every tile is durable after close.
    assert_eq!(
        store.list_matching("s3://host/bucket/run/master/t.*.nc").len(),
        5
    );

    // And every tile reads back through the reopened master.
    let mut dataset = AggregationDataset::open(
        master_uri,
        "r",
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new()
            .with_object_store(store)
            .with_memory_limit(2 * TILE_BYTES),
    )?;
    for tile in 0..5u64 {
        let rows = tile * 2..tile * 2 + 2;
        let values: Vec<f32> =
            dataset.read_elements("t", &Hyperslab::from_ranges(&[rows, 0..2]))?;
        assert_eq!(values, vec![tile as f32; 4]);
    }
    Ok(())
}

#[test]
fn tile_larger_than_budget_is_resource_exhausted() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryObjectStore::new());
    let mut dataset = AggregationDataset::create(
        "s3://host/bucket/run/master.nc",
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new()
            .with_object_store(store)
            .with_memory_limit(TILE_BYTES / 2),
    )?;
    dataset.create_dimension("", "x", Some(2))?;
    dataset.create_dimension("", "y", Some(2))?;
    dataset.create_variable(
        "",
        "t",
        DataType::Float32,
        &["x", "y"],
        &VariableSpec::new().with_subarray_shape(vec![2, 2]),
    )?;
    let err = dataset
        .write_elements("t", &Hyperslab::full(2), &[1.0f32; 4])
        .unwrap_err();
    assert!(
        matches!(
            err,
            DatasetError::Variable(VariableError::FileManager(
                FileManagerError::ResourceExhausted { .. }
            ))
        ),
        "{err}"
    );
    Ok(())
}

#[test]
fn overwrite_after_eviction_reopens_the_tile() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryObjectStore::new());
    let master_uri = "s3://host/bucket/run/master.nc";
    let mut dataset = AggregationDataset::create(
        master_uri,
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new()
            .with_object_store(store.clone())
            .with_memory_limit(TILE_BYTES),
    )?;
    dataset.create_dimension("", "x", Some(4))?;
    dataset.create_dimension("", "y", Some(2))?;
    dataset.create_variable(
        "",
        "t",
        DataType::Float32,
        &["x", "y"],
        &VariableSpec::new().with_subarray_shape(vec![2, 2]),
    )?;

    // Write tile 0, force it out with tile 1, then write half of tile 0 again.
    dataset.write_elements("t", &Hyperslab::from_ranges(&[0..2, 0..2]), &[1.0f32; 4])?;
    dataset.write_elements("t", &Hyperslab::from_ranges(&[2..4, 0..2]), &[2.0f32; 4])?;
    dataset.write_elements("t", &Hyperslab::from_ranges(&[0..1, 0..2]), &[9.0f32; 2])?;
    dataset.close()?;

    let mut dataset = AggregationDataset::open(
        master_uri,
        "r",
        DatasetFormat::Default,
        "0.4",
        DatasetOptions::new().with_object_store(store),
    )?;
    let values: Vec<f32> = dataset.read_elements("t", &Hyperslab::from_ranges(&[0..2, 0..2]))?;
    // The second write landed on the reopened tile without losing the first.
    assert_eq!(values, vec![9.0, 9.0, 1.0, 1.0]);
    Ok(())
}
