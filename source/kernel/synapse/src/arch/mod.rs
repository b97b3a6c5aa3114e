// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Architecture glue. Only the bare-metal x86 target has any.

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod x86;
