// Copyright 2024-2026 reconcile-core Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI subcommands that run without a live controller.
//!
//! ## Usage
//!
//! ```bash
//! reconcile-core validate manifests/          # exits 0 when every document is valid
//! reconcile-core plan desired.yaml live.yaml  # prints the action plan as JSON
//! reconcile-core config show                  # effective configuration
//! ```

pub mod config_cmd;
pub mod manifest_cmd;

pub use manifest_cmd::{run_plan, run_validate};
