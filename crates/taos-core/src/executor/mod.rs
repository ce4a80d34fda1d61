// Copyright (C) 2025 The taos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor module - infrastructure-as-code backends.

pub mod mock;
pub mod terraform;
mod traits;

pub use mock::{MockExecutor, MockExecutorFactory};
pub use terraform::{TerraformExecutor, TerraformExecutorFactory};
pub use traits::*;
