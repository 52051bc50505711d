#![allow(dead_code)]

use operations_queue::{AuthMethod, OperationType};
use std::time::Duration;

pub const DETECT: OperationType = OperationType::DetectUnfollowers;
pub const UNFOLLOW_ALL: OperationType = OperationType::UnfollowEveryone;
pub const UNFOLLOW_NON_FOLLOWERS: OperationType = OperationType::UnfollowNonFollowers;

pub const API: AuthMethod = AuthMethod::Api;
pub const SESSION: AuthMethod = AuthMethod::Session;

pub const TEST_USER_ID: &str = "user-1";

/// Backoff base used by the fast test settings.
pub const TEST_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Upper bound on how long a test waits for a job to reach a state.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
