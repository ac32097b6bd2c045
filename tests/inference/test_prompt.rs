// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use vl_ocr::config::{OcrConfig, OCR_INSTRUCTION};
use vl_ocr::inference::chat_template::{ChatTemplate, IMAGE_PAD, VISION_END, VISION_START};
use vl_ocr::inference::{build, ContentPart, Role};

#[test]
fn test_message_is_single_user_turn_image_first() {
    let config = OcrConfig::default();
    let message = build(
        "receipt.png",
        &config.instruction,
        config.resized_height,
        config.resized_width,
    );

    assert_eq!(message.role(), Role::User);
    assert_eq!(message.content().len(), 2);

    match &message.content()[0] {
        ContentPart::Image(image) => {
            assert_eq!(image.source(), "receipt.png");
            assert_eq!(image.resized_height(), 800);
            assert_eq!(image.resized_width(), 840);
        }
        other => panic!("expected image part first, got {:?}", other),
    }
    match &message.content()[1] {
        ContentPart::Text(text) => assert_eq!(text, OCR_INSTRUCTION),
        other => panic!("expected text part second, got {:?}", other),
    }
}

#[test]
fn test_source_is_passed_through_verbatim() {
    for source in [
        "/tmp/scan.png",
        "file:///tmp/scan.png",
        "https://example.com/receipt.jpg",
        "",
    ] {
        let message = build(source, "Read.", 10, 20);
        let image = message.images().next().unwrap();
        assert_eq!(image.source(), source);
    }
}

#[test]
fn test_rendered_prompt_places_image_before_instruction() {
    let message = build("receipt.png", OCR_INSTRUCTION, 800, 840);
    let prompt = ChatTemplate::Qwen2Vl.render(&[message], true);
    let text = prompt.as_str();

    let vision = text.find(VISION_START).unwrap();
    let instruction = text.find(OCR_INSTRUCTION).unwrap();
    assert!(vision < instruction);
    assert!(text.contains(&format!("{}{}{}", VISION_START, IMAGE_PAD, VISION_END)));
    assert!(text.ends_with("<|im_start|>assistant\n"));
    assert_eq!(prompt.image_placeholders(), 1);
}
