use omni_chat_rs::bot::media_groups::{BatchAction, MediaGroups, MediaItem};
use omni_chat_rs::llm::RequestPart;
use std::sync::Arc;

fn item(file_id: &str, file_size: u32) -> MediaItem {
    MediaItem {
        file_id: file_id.to_string(),
        file_size,
    }
}

#[tokio::test]
async fn burst_buffers_into_one_batch_with_one_flush() {
    let groups = MediaGroups::new();

    let first = groups.add(1, "g1", item("photo-a-0000001", 100), None).await;
    assert_eq!(first, BatchAction::ScheduleFlush);

    for i in 2..=5 {
        let action = groups
            .add(1, "g1", item(&format!("photo-{i}-0000001"), 100), None)
            .await;
        assert_eq!(action, BatchAction::Buffered);
    }

    let batch = groups.take(1, "g1").await.expect("batch should be pending");
    assert_eq!(batch.into_deduped_items().len(), 5);

    // The batch is consumed exactly once.
    assert!(groups.take(1, "g1").await.is_none());
}

#[tokio::test]
async fn size_variants_collapse_to_the_largest() {
    let groups = MediaGroups::new();

    // Telegram hands out several size variants per photo whose file ids
    // differ only in a short trailing section.
    groups.add(1, "g1", item("photo-a-0000001", 1_000), None).await;
    groups.add(1, "g1", item("photo-a-0000002", 50_000), None).await;
    groups.add(1, "g1", item("photo-a-0000003", 9_000), None).await;
    groups.add(1, "g1", item("photo-b-0000001", 2_000), None).await;

    let batch = groups.take(1, "g1").await.expect("batch should be pending");
    let items = batch.into_deduped_items();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].file_id, "photo-a-0000002");
    assert_eq!(items[0].file_size, 50_000);
    assert_eq!(items[1].file_id, "photo-b-0000001");
}

#[tokio::test]
async fn caption_comes_from_any_item_in_the_burst() {
    let groups = MediaGroups::new();

    groups.add(1, "g1", item("a-0000001", 1), None).await;
    groups.add(1, "g1", item("b-0000001", 1), Some("three cats")).await;
    groups.add(1, "g1", item("c-0000001", 1), Some("")).await;

    let batch = groups.take(1, "g1").await.expect("batch should be pending");
    assert_eq!(batch.caption(), "three cats");
}

#[tokio::test]
async fn captionless_batch_sends_an_empty_text_part() {
    let groups = MediaGroups::new();

    groups.add(1, "g1", item("a-0000001", 1), None).await;
    groups.add(1, "g1", item("b-0000001", 1), None).await;

    let batch = groups.take(1, "g1").await.expect("batch should be pending");
    // No substitute prompt: the caption stays empty and reaches the request
    // builder as-is.
    assert_eq!(batch.caption(), "");
    let parts =
        omni_chat_rs::bot::media::build_parts(batch.caption(), Vec::new()).expect("assembly");
    assert_eq!(parts, vec![RequestPart::Text(String::new())]);
}

#[tokio::test]
async fn straggler_after_flush_opens_a_fresh_batch() {
    let groups = MediaGroups::new();

    groups.add(1, "g1", item("a-0000001", 1), None).await;
    groups.take(1, "g1").await.expect("batch should be pending");

    // A message from the same group arriving after the flush behaves like
    // the start of a new batch, flush task included.
    let action = groups.add(1, "g1", item("b-0000001", 1), None).await;
    assert_eq!(action, BatchAction::ScheduleFlush);
    let batch = groups.take(1, "g1").await.expect("fresh batch");
    assert_eq!(batch.into_deduped_items().len(), 1);
}

#[tokio::test]
async fn batches_are_isolated_by_chat_and_group() {
    let groups = MediaGroups::new();

    groups.add(1, "g1", item("a-0000001", 1), Some("one")).await;
    groups.add(1, "g2", item("b-0000001", 1), Some("two")).await;
    groups.add(2, "g1", item("c-0000001", 1), Some("three")).await;

    assert_eq!(groups.take(1, "g1").await.map(|b| b.caption().to_string()), Some("one".to_string()));
    assert_eq!(groups.take(1, "g2").await.map(|b| b.caption().to_string()), Some("two".to_string()));
    assert_eq!(groups.take(2, "g1").await.map(|b| b.caption().to_string()), Some("three".to_string()));
}

#[tokio::test]
async fn concurrent_burst_arms_exactly_one_flush() {
    let groups = Arc::new(MediaGroups::new());

    let mut tasks = Vec::new();
    for i in 0..10 {
        let groups = groups.clone();
        tasks.push(tokio::spawn(async move {
            groups
                .add(1, "g1", item(&format!("photo-{i}-0000001"), 1), None)
                .await
        }));
    }

    let mut flushes = 0;
    for task in tasks {
        if task.await.expect("task panicked") == BatchAction::ScheduleFlush {
            flushes += 1;
        }
    }
    assert_eq!(flushes, 1);

    let batch = groups.take(1, "g1").await.expect("batch should be pending");
    assert_eq!(batch.into_deduped_items().len(), 10);
}

#[test]
fn request_assembly_keeps_text_first_and_media_in_order() {
    // PNG header is enough for the decoder used during normalization.
    let png = tiny_png();
    let parts = omni_chat_rs::bot::media::build_parts(
        "look at these",
        vec![
            omni_chat_rs::bot::media::InboundMedia::Photo { bytes: png.clone() },
            omni_chat_rs::bot::media::InboundMedia::Voice {
                bytes: vec![1, 2, 3],
                mime_type: None,
            },
        ],
    )
    .expect("assembly should succeed");

    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], RequestPart::Text("look at these".to_string()));
    let RequestPart::InlineData { mime_type, .. } = &parts[1] else {
        panic!("expected inline image");
    };
    assert_eq!(mime_type, "image/jpeg");
    let RequestPart::InlineData { mime_type, .. } = &parts[2] else {
        panic!("expected inline voice payload");
    };
    assert_eq!(mime_type, "audio/ogg");
}

/// Encode a 1x1 image so the normalization path has a real file to chew on.
fn tiny_png() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(1, 1, image::Rgba([10, 20, 30, 255]));
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .expect("encoding a 1x1 png cannot fail");
    buf.into_inner()
}
