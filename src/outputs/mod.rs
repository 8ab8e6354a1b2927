//! Durable outputs of a crawl.
//!
//! # Submodules
//!
//! - [`json`]: one JSON record per article, written atomically
//! - [`report`]: the run summary and failure list used by `recrawl`
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── 2024_03/
//! │   └── article_78123.json
//! └── _runs/
//!     └── run-20240301T120000Z-3f2a9c1e.json
//! ```

pub mod json;
pub mod report;
