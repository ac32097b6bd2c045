// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Test runner for inference module tests
mod inference {
    mod test_decode;
    mod test_prompt;
    mod test_timing;
}
