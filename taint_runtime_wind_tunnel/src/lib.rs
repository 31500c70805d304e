// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Benchmarks for `taint_runtime`.
//!
//! Run with `cargo bench -p taint_runtime_wind_tunnel`.
