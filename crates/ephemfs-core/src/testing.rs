// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Test-only utilities for ephemfs core
//!
//! Compiled for this crate's own tests and, behind the `test-utils`
//! feature, for other crates' tests.

pub mod failing_store;
