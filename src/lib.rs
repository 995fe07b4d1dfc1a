//! A rust library for aggregated scientific datasets: a single
//! hierarchical-array-file abstraction whose partitioned variables are
//! physically sharded across many subarray files, some on remote object
//! stores, indexed by a master file following the CFA-style aggregation
//! convention (v0.4 and v0.5).
//!
//! The engine partitions each large variable into tiles described by a
//! [`PartitionMatrix`](partition::PartitionMatrix), translates n-dimensional
//! slices into per-subarray read/write operations, creates and caches
//! subarray files on demand under a bounded memory budget, and serialises the
//! partition metadata into the master on close.
//!
//! The best docs to start with are [`dataset::AggregationDataset`] and
//! [`partition`].
//!
//! ## Example
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use ncagg::dataset::{AggregationDataset, DatasetFormat, DatasetOptions, VariableSpec};
//! use ncagg::data_type::DataType;
//! use ncagg::hyperslab::Hyperslab;
//!
//! let mut dataset = AggregationDataset::create(
//!     "/data/run/master.nc",
//!     DatasetFormat::Default,
//!     "0.4",
//!     DatasetOptions::new(),
//! )?;
//! dataset.create_dimension("", "x", Some(4))?;
//! dataset.create_dimension("", "y", Some(4))?;
//! dataset.create_variable(
//!     "",
//!     "t",
//!     DataType::Float32,
//!     &["x", "y"],
//!     &VariableSpec::new().with_subarray_shape(vec![2, 2]),
//! )?;
//! dataset.write_elements("t", &Hyperslab::full(2), &[1.0f32; 16])?;
//! dataset.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Scope
//! Transport backends and real array-format parsing stay behind two narrow
//! seams, [`storage::ByteStreamProvider`] and
//! [`structured::StructuredFileProvider`]; the bundled implementations cover
//! local files and an in-memory object store. A dataset is single-threaded
//! cooperative: it is not safe for concurrent mutation from multiple threads,
//! while independent datasets may run on separate threads provided they do
//! not share URIs in write mode.

#![warn(unused_variables)]
#![warn(dead_code)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![deny(clippy::missing_panics_doc)]

pub mod array_subset;
pub mod convention;
pub mod data_type;
pub mod dataset;
pub mod dimension;
pub mod file_manager;
pub mod group;
pub mod hyperslab;
pub mod partition;
pub mod storage;
pub mod structured;
pub mod uri;
pub mod variable;

/// Re-export [`bytemuck`].
pub use bytemuck;

/// Re-export [`serde_json`].
pub use serde_json;
