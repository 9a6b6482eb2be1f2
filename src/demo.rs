use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::core::models::{Priority, Student};
use crate::error::Error;
use crate::source::{MessagePayload, RemoteSource};

/// In-memory stand-in for the remote API, selected for demo sessions.
///
/// State lives in-process only: exiting demo mode leaves nothing behind
/// except what the coordinator wrote into the store for display. Responses
/// are delayed a little so the walkthrough doesn't feel canned.
pub struct DemoDataProvider {
    students: Mutex<Vec<Student>>,
    messages: Mutex<HashMap<i64, Vec<MessagePayload>>>,
}

fn message(
    id: i64,
    title: &str,
    content: &str,
    priority: Priority,
    group_name: Option<&str>,
    sent_time: &str,
) -> MessagePayload {
    MessagePayload {
        id,
        title: title.into(),
        content: content.into(),
        priority,
        group_name: group_name.map(Into::into),
        images: None,
        sent_time: sent_time.into(),
        read: false,
    }
}

impl DemoDataProvider {
    pub fn new() -> Self {
        let students = vec![
            Student {
                id: 1001,
                student_number: "S-2026-018".into(),
                given_name: "Mina".into(),
                family_name: "Okada".into(),
                phone_number: Some("080-1234-5678".into()),
                email: Some("mina.okada@example.com".into()),
                unread_count: 0,
            },
            Student {
                id: 1002,
                student_number: "S-2026-042".into(),
                given_name: "Ren".into(),
                family_name: "Okada".into(),
                phone_number: None,
                email: None,
                unread_count: 0,
            },
        ];

        let mut messages = HashMap::new();
        messages.insert(
            1001,
            vec![
                message(
                    9005,
                    "Field trip reminder",
                    "The bus leaves at 8:15 sharp on Friday. Please pack a lunch.",
                    Priority::High,
                    Some("Grade 3"),
                    "2026-08-04T07:30:00Z",
                ),
                message(
                    9004,
                    "PTA meeting minutes",
                    "Minutes from last week's meeting are attached to the class page.",
                    Priority::Low,
                    Some("PTA"),
                    "2026-08-01T15:00:00Z",
                ),
                message(
                    9003,
                    "Swimming class schedule",
                    "Swimming resumes next Wednesday. Bring goggles and a towel.",
                    Priority::Medium,
                    None,
                    "2026-07-28T09:00:00Z",
                ),
            ],
        );
        messages.insert(
            1002,
            vec![
                message(
                    9102,
                    "Library books due",
                    "Two borrowed titles are due back this week.",
                    Priority::Medium,
                    None,
                    "2026-08-03T10:00:00Z",
                ),
                message(
                    9101,
                    "Sports day volunteers",
                    "We are still looking for two parent volunteers for the relay station.",
                    Priority::Low,
                    Some("Sports day"),
                    "2026-07-30T12:00:00Z",
                ),
            ],
        );

        DemoDataProvider {
            students: Mutex::new(students),
            messages: Mutex::new(messages),
        }
    }

    async fn simulate_latency() {
        let ms = rand::thread_rng().gen_range(120..400);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

impl Default for DemoDataProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteSource for DemoDataProvider {
    async fn list_students(&self, _access_token: &str) -> Result<Vec<Student>, Error> {
        Self::simulate_latency().await;
        let messages = self.messages.lock().expect("demo state poisoned");
        let mut students = self.students.lock().expect("demo state poisoned").clone();
        for s in &mut students {
            s.unread_count = messages
                .get(&s.id)
                .map(|list| list.iter().filter(|m| !m.read).count() as u32)
                .unwrap_or(0);
        }
        Ok(students)
    }

    async fn list_messages(
        &self,
        _access_token: &str,
        student_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<MessagePayload>, Error> {
        Self::simulate_latency().await;
        let map = self.messages.lock().expect("demo state poisoned");
        let all = map.get(&student_id).cloned().unwrap_or_default();
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn mark_read(
        &self,
        _access_token: &str,
        student_id: i64,
        message_id: i64,
    ) -> Result<(), Error> {
        Self::simulate_latency().await;
        let mut map = self.messages.lock().expect("demo state poisoned");
        if let Some(list) = map.get_mut(&student_id) {
            for m in list.iter_mut().filter(|m| m.id == message_id) {
                m.read = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unread_counts_follow_demo_read_state() {
        let provider = DemoDataProvider::new();

        let before = provider.list_students("demo").await.unwrap();
        let mina = before.iter().find(|s| s.id == 1001).unwrap();
        assert_eq!(mina.unread_count, 3);

        provider.mark_read("demo", 1001, 9005).await.unwrap();

        let after = provider.list_students("demo").await.unwrap();
        let mina = after.iter().find(|s| s.id == 1001).unwrap();
        assert_eq!(mina.unread_count, 2);
    }

    #[tokio::test]
    async fn messages_paginate_newest_first() {
        let provider = DemoDataProvider::new();

        let first = provider.list_messages("demo", 1001, 0, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].id, 9005);

        let rest = provider.list_messages("demo", 1001, 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, 9003);
    }

    #[tokio::test]
    async fn acknowledged_reads_show_up_in_later_fetches() {
        let provider = DemoDataProvider::new();
        provider.mark_read("demo", 1002, 9102).await.unwrap();

        let page = provider.list_messages("demo", 1002, 0, 10).await.unwrap();
        assert!(page.iter().find(|m| m.id == 9102).unwrap().read);
    }
}
