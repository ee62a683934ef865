// Copyright 2026 relay-core Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI module for relay-core commands.
//!
//! Offline tooling around the proxy: inspecting the layered configuration and
//! replaying a recorded request sequence against an in-process transport.
//!
//! ## Usage
//!
//! ```bash
//! relay-core-cli config show        # Effective configuration
//! relay-core-cli config validate    # Exit 1 on suspicious combinations
//! relay-core-cli replay calls.json  # Print the wire calls a sequence produces
//! ```

pub mod config_cmd;
pub mod replay;

pub use replay::{run_replay, ReplayError, ReplayStep};
