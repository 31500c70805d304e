// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Conformance suite for `taint_runtime`.
//!
//! The tests live in `tests/conformance.rs`; run them with
//! `cargo test -p taint_runtime_conformance`.
