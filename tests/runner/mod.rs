//! Runner workflow tests.

mod workflow_test;
