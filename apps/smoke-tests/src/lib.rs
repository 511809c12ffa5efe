//! End-to-end conformance tests for the compressor live under `tests/`.
