// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! # Utilities Module
//!
//! Common utility functions and modules for accelara.

pub mod paths;

pub use paths::{filename_from_url, resolve_out_path, TempArea};
