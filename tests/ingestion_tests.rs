//! Ingestion and identity-resolution tests against the real pipeline.

mod test_utils;

use chrono::{Duration, Utc};
use tenant_gateway::ingestion::IngestOutcome;
use tenant_gateway::queue::{AutoReplyJob, Lane, dequeue};
use tenant_gateway::session::{
    HistoryConversation, HistoryMessage, InboundMessage, MediaRef, MessageContent, NetworkEvent,
    Receipt,
};
use test_utils::{Harness, create_test_tenant};

fn text_message(id: &str, chat: &str, sender: &str, text: &str) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        chat_jid: chat.to_string(),
        sender_jid: sender.to_string(),
        sender_name: Some("Budi".to_string()),
        is_from_me: false,
        is_group: false,
        timestamp: Utc::now(),
        content: MessageContent::Text {
            text: text.to_string(),
        },
    }
}

fn image_message(id: &str, sender: &str) -> InboundMessage {
    InboundMessage {
        content: MessageContent::Image {
            caption: String::new(),
            media: MediaRef {
                handle: format!("cdn-{}", id),
                mime_type: Some("image/jpeg".to_string()),
            },
        },
        ..text_message(id, sender, sender, "")
    }
}

fn stored_files(harness: &Harness, tenant_id: uuid::Uuid) -> usize {
    std::fs::read_dir(harness.media.root().join(tenant_id.to_string()))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn duplicate_events_are_stored_and_enqueued_once() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let tenant_id = create_test_tenant(&harness.db).await?;
    let client = harness.client(tenant_id);
    let message = text_message(
        "3EB0001",
        "62811111@s.whatsapp.net",
        "62811111:4@s.whatsapp.net",
        "Halo, masih buka?",
    );

    let first = harness
        .ingestion
        .ingest_message(tenant_id, &client, message.clone())
        .await;
    let second = harness
        .ingestion
        .ingest_message(tenant_id, &client, message)
        .await;

    assert_eq!(first, IngestOutcome::Stored { enqueued: true });
    assert_eq!(second, IngestOutcome::Duplicate);
    assert_eq!(harness.messages.count_for_tenant(tenant_id).await?, 1);
    assert_eq!(harness.queue.len(Lane::AutoReply).await, 1);

    let job: AutoReplyJob = dequeue(harness.queue.as_ref(), std::time::Duration::from_millis(50))
        .await?
        .expect("job queued");
    assert_eq!(job.sender_jid, "62811111@s.whatsapp.net");
    assert_eq!(job.message_text, "Halo, masih buka?");
    Ok(())
}

#[tokio::test]
async fn group_and_own_messages_are_not_enqueued() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let tenant_id = create_test_tenant(&harness.db).await?;
    let client = harness.client(tenant_id);

    let mut group = text_message(
        "G1",
        "120363000@g.us",
        "62811111@s.whatsapp.net",
        "rapat jam 3",
    );
    group.is_group = true;
    let mut own = text_message(
        "O1",
        "62811111@s.whatsapp.net",
        "62800000001@s.whatsapp.net",
        "siap",
    );
    own.is_from_me = true;

    assert_eq!(
        harness.ingestion.ingest_message(tenant_id, &client, group).await,
        IngestOutcome::Stored { enqueued: false }
    );
    assert_eq!(
        harness.ingestion.ingest_message(tenant_id, &client, own).await,
        IngestOutcome::Stored { enqueued: false }
    );
    assert!(harness.queue.is_empty(Lane::AutoReply).await);
    Ok(())
}

#[tokio::test]
async fn same_message_id_is_independent_per_tenant() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let first_tenant = create_test_tenant(&harness.db).await?;
    let second_tenant = create_test_tenant(&harness.db).await?;
    let message = text_message("SHARED", "62811@s.whatsapp.net", "62811@s.whatsapp.net", "hi");

    for tenant_id in [first_tenant, second_tenant] {
        let outcome = harness
            .ingestion
            .ingest_message(tenant_id, &harness.client(tenant_id), message.clone())
            .await;
        assert_eq!(outcome, IngestOutcome::Stored { enqueued: true });
    }
    assert_eq!(harness.queue.len(Lane::AutoReply).await, 2);
    Ok(())
}

#[tokio::test]
async fn receipts_learn_aliases_and_rewrite_history() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let tenant_id = create_test_tenant(&harness.db).await?;
    let client = harness.client(tenant_id);

    // An inbound message from the anonymized identity before any alias is known.
    let anonymous = text_message("L1", "99887766@lid", "99887766@lid", "mau pesan");
    harness
        .ingestion
        .ingest_message(tenant_id, &client, anonymous)
        .await;
    let stored = harness.messages.find(tenant_id, "L1").await?.expect("stored");
    assert_eq!(stored.sender_jid, "99887766@lid");

    // The gateway sends to the phone identity, then the receipt arrives on the lid chat.
    harness.sessions.connect(tenant_id).await?;
    let sent = harness
        .sessions
        .send_text(tenant_id, "6281234@s.whatsapp.net", "Terima kasih")
        .await?;
    harness
        .ingestion
        .handle_receipt(
            tenant_id,
            Receipt {
                chat_jid: "99887766@lid".to_string(),
                sender_jid: None,
                message_ids: vec![sent.message_id],
                receipt_type: None,
            },
        )
        .await;

    let rewritten = harness.messages.find(tenant_id, "L1").await?.expect("stored");
    assert_eq!(rewritten.sender_jid, "6281234@s.whatsapp.net");
    assert_eq!(rewritten.chat_jid, "6281234@s.whatsapp.net");

    // Later messages from the anonymized identity resolve to the phone form.
    let follow_up = text_message("L2", "99887766@lid", "99887766@lid", "jadi pesan 2");
    harness
        .ingestion
        .ingest_message(tenant_id, &client, follow_up)
        .await;
    let resolved = harness.messages.find(tenant_id, "L2").await?.expect("stored");
    assert_eq!(resolved.sender_jid, "6281234@s.whatsapp.net");
    Ok(())
}

#[tokio::test]
async fn history_sync_keeps_only_the_last_five_minutes() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let tenant_id = create_test_tenant(&harness.db).await?;

    let recent = HistoryMessage {
        id: "H1".to_string(),
        is_from_me: false,
        timestamp: Utc::now() - Duration::minutes(1),
        content: MessageContent::Text {
            text: "barusan".to_string(),
        },
    };
    let stale = HistoryMessage {
        id: "H2".to_string(),
        is_from_me: false,
        timestamp: Utc::now() - Duration::hours(2),
        content: MessageContent::Text {
            text: "tadi pagi".to_string(),
        },
    };
    let empty = HistoryMessage {
        id: "H3".to_string(),
        is_from_me: false,
        timestamp: Utc::now(),
        content: MessageContent::Other,
    };

    let stored = harness
        .ingestion
        .ingest_history(
            tenant_id,
            vec![HistoryConversation {
                chat_jid: "62811@s.whatsapp.net".to_string(),
                messages: vec![recent, stale, empty],
            }],
        )
        .await;

    assert_eq!(stored, 1);
    assert!(harness.messages.find(tenant_id, "H1").await?.is_some());
    assert!(harness.queue.is_empty(Lane::AutoReply).await);
    Ok(())
}

#[tokio::test]
async fn events_pushed_to_a_live_session_reach_storage() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let tenant_id = create_test_tenant(&harness.db).await?;
    harness.sessions.connect(tenant_id).await?;

    harness.sessions.deliver(
        tenant_id,
        NetworkEvent::Message(text_message(
            "P1",
            "62811@s.whatsapp.net",
            "62811@s.whatsapp.net",
            "ada promo?",
        )),
    )?;

    let mut stored = None;
    for _ in 0..50 {
        stored = harness.messages.find(tenant_id, "P1").await?;
        if stored.is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(stored.is_some(), "pumped message was stored");
    Ok(())
}

#[tokio::test]
async fn images_arriving_together_keep_separate_files() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let tenant_id = create_test_tenant(&harness.db).await?;
    let client = harness.client(tenant_id);
    let sender = "62811111@s.whatsapp.net";

    for id in ["IMG_A", "IMG_B"] {
        let outcome = harness
            .ingestion
            .ingest_message(tenant_id, &client, image_message(id, sender))
            .await;
        assert!(matches!(outcome, IngestOutcome::Stored { .. }));
    }

    let first = harness.messages.find(tenant_id, "IMG_A").await?.expect("stored");
    let second = harness.messages.find(tenant_id, "IMG_B").await?.expect("stored");
    let first_url = first.media_url.expect("first image saved locally");
    let second_url = second.media_url.expect("second image saved locally");
    assert!(first_url.starts_with(&format!("/uploads/{}/", tenant_id)));
    assert_ne!(first_url, second_url);
    assert_eq!(stored_files(&harness, tenant_id), 2);
    Ok(())
}

#[tokio::test]
async fn replayed_media_events_do_not_download_again() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let tenant_id = create_test_tenant(&harness.db).await?;
    let client = harness.client(tenant_id);
    let message = image_message("IMG_REPLAY", "62811111@s.whatsapp.net");

    let first = harness
        .ingestion
        .ingest_message(tenant_id, &client, message.clone())
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
    let replay = harness
        .ingestion
        .ingest_message(tenant_id, &client, message)
        .await;

    assert!(matches!(first, IngestOutcome::Stored { .. }));
    assert_eq!(replay, IngestOutcome::Duplicate);
    assert_eq!(harness.messages.count_for_tenant(tenant_id).await?, 1);
    assert_eq!(stored_files(&harness, tenant_id), 1);

    let stored = harness
        .messages
        .find(tenant_id, "IMG_REPLAY")
        .await?
        .expect("stored");
    let path = harness
        .media
        .resolve_local(stored.media_url.as_deref().expect("media url"))
        .expect("local path");
    assert_eq!(std::fs::read(path)?, b"fake-media");
    Ok(())
}
