// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YAML loading of writer and reader attributes.

use std::io::Write;
use std::time::Duration;

use hdds_reliable::config::{ReaderAttributes, ReliabilityConfig, WriterAttributes};
use hdds_reliable::Error;

const PROFILE: &str = r"
writer:
  times:
    heartbeat_period: { secs: 0, nanos: 250000000 }
    nack_response_delay: { secs: 0, nanos: 0 }
  push_mode: false
  fragment_size: 1024
reader:
  times:
    heartbeat_response_delay: { secs: 0, nanos: 2000000 }
  expects_inline_qos: true
";

#[test]
fn test_partial_profile_keeps_defaults() {
    let config = ReliabilityConfig::from_yaml_str(PROFILE).expect("parse");
    let writer_defaults = WriterAttributes::default();
    let reader_defaults = ReaderAttributes::default();

    assert_eq!(config.writer.times.heartbeat_period, Duration::from_millis(250));
    assert_eq!(config.writer.times.nack_response_delay, Duration::ZERO);
    assert_eq!(
        config.writer.times.initial_heartbeat_delay,
        writer_defaults.times.initial_heartbeat_delay
    );
    assert!(!config.writer.push_mode);
    assert_eq!(config.writer.fragment_size, 1024);
    assert_eq!(config.writer.max_message_size, writer_defaults.max_message_size);

    assert_eq!(
        config.reader.times.heartbeat_response_delay,
        Duration::from_millis(2)
    );
    assert_eq!(
        config.reader.times.initial_acknack_delay,
        reader_defaults.times.initial_acknack_delay
    );
    assert!(config.reader.expects_inline_qos);
    assert_eq!(
        config.reader.max_pending_reassemblies,
        reader_defaults.max_pending_reassemblies
    );
}

#[test]
fn test_empty_document_is_default() {
    let config = ReliabilityConfig::from_yaml_str("{}").expect("parse");
    assert_eq!(config, ReliabilityConfig::default());
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(PROFILE.as_bytes()).expect("write");
    let config = ReliabilityConfig::from_yaml_file(file.path()).expect("load");
    assert_eq!(config.writer.fragment_size, 1024);
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("reliability.yaml");
    let err = ReliabilityConfig::from_yaml_file(&missing).expect_err("missing file");
    assert!(matches!(err, Error::Config(msg) if msg.contains("reliability.yaml")));
}

#[test]
fn test_inconsistent_sizes_are_rejected() {
    let yaml = "writer:\n  max_message_size: 512\n  fragment_size: 1024\n";
    assert!(matches!(
        ReliabilityConfig::from_yaml_str(yaml),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_malformed_yaml_is_rejected() {
    assert!(matches!(
        ReliabilityConfig::from_yaml_str("writer: [not, a, map]"),
        Err(Error::Config(_))
    ));
}
