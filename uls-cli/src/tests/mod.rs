//! Shared test harness modules for the `uls` CLI.

use super::*;
