// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::thread;
use std::time::Duration;
use vl_ocr::inference::{timed, Elapsed};

#[test]
fn test_elapsed_covers_the_measured_call() {
    let (value, elapsed) = timed(|| {
        thread::sleep(Duration::from_millis(30));
        42
    });
    assert_eq!(value, 42);
    assert!(elapsed.as_duration() >= Duration::from_millis(30));
}

#[test]
fn test_failed_call_is_still_measured() {
    let (result, elapsed): (Result<(), String>, Elapsed) = timed(|| {
        thread::sleep(Duration::from_millis(5));
        Err("boom".to_string())
    });
    assert!(result.is_err());
    assert!(elapsed.as_duration() >= Duration::from_millis(5));
}

#[test]
fn test_minutes_and_seconds_display() {
    let cases = [
        (0, "0m 0s"),
        (59_999, "0m 59s"),
        (60_000, "1m 0s"),
        (3_725_400, "62m 5s"),
    ];
    for (millis, expected) in cases {
        let elapsed = Elapsed::from_duration(Duration::from_millis(millis));
        assert_eq!(elapsed.to_string(), expected);
        assert_eq!(elapsed.minutes() * 60 + elapsed.seconds(), millis / 1000);
    }
}
