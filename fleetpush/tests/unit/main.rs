//! Integration tests for fleetpush

mod support;
mod test_fsm;
mod test_run;
