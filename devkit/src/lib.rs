/*!
# Patchnet DevKit - Test Stubs and Utilities

Support library for testing the kernel against live HTTP peers:
- Stub scan/install agents on real ephemeral ports
- Request accounting for asserting probe behavior
- Free-port helper for simulating dead hosts
*/

pub mod agent_stub;

pub use agent_stub::{free_port, StubAgent, StubAgentBuilder};
