// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Shared test utilities for calpush-core integration tests.

#![allow(dead_code, unused_imports)]

mod fixtures;

pub use fixtures::*;
