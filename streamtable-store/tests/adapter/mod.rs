use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::TryStreamExt;
use parse_display::{Display, FromStr};
use sea_query_binder::SqlxValues;
use serde::{Deserialize, Serialize};
use sqlx::Database;
use streamtable_store::{
    EventRow, Message, MessageRegistry, Stream, StreamAdapter, StreamName, StoreError,
};

#[derive(Display, FromStr, Debug, PartialEq)]
#[display(style = "kebab-case")]
pub enum UserEvent {
    Created,
    DisplayNameUpdated,
    ProfileUpdated,
    AccountDeleted,
}

impl From<UserEvent> for String {
    fn from(val: UserEvent) -> Self {
        val.to_string()
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Created {
    pub username: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct DisplayNameUpdated {
    pub display_name: String,
}

pub fn at(secs: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs.into())
}

pub fn user_event(event: UserEvent, id: &str, version: u64) -> Message {
    Message::new(event)
        .aggregate("user", id)
        .version(version)
}

pub fn created(id: &str, username: &str) -> anyhow::Result<Message> {
    Ok(user_event(UserEvent::Created, id, 1).payload(Created {
        username: username.to_owned(),
    })?)
}

fn versions(events: &[Message]) -> Vec<(String, u64)> {
    events
        .iter()
        .map(|e| (e.aggregate_id().unwrap_or_default().to_owned(), e.version))
        .collect()
}

pub async fn test_load_in_version_order<DB>(adapter: &StreamAdapter<DB>) -> anyhow::Result<()>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    SqlxValues: for<'q> sqlx::IntoArguments<'q, DB>,
    EventRow: for<'r> sqlx::FromRow<'r, DB::Row>,
{
    let name = StreamName::new("App\\Model\\User")?;
    let events = vec![
        user_event(UserEvent::DisplayNameUpdated, "1", 2).payload(DisplayNameUpdated {
            display_name: "john007".to_owned(),
        })?,
        created("1", "john.doe")?,
        user_event(UserEvent::AccountDeleted, "1", 3),
    ];

    adapter.create(Stream::new(name.clone(), events.clone())).await?;

    let stream = adapter.load(&name, None).await?;

    assert_eq!(stream.name, name);
    assert_eq!(
        versions(&stream.events),
        vec![("1".to_owned(), 1), ("1".to_owned(), 2), ("1".to_owned(), 3)]
    );
    assert_eq!(
        stream.events.iter().map(|e| e.uuid).collect::<Vec<_>>(),
        vec![events[1].uuid, events[0].uuid, events[2].uuid]
    );

    let first = &stream.events[0];
    let user_event: UserEvent = first.name.parse()?;

    assert_eq!(user_event, UserEvent::Created);
    assert_eq!(
        first.to_payload::<Created>()?,
        Created {
            username: "john.doe".to_owned()
        }
    );
    assert_eq!(first.aggregate_type(), Some("user"));

    let since_two = adapter.load(&name, Some(2)).await?;

    assert_eq!(
        since_two.events.iter().map(|e| e.version).collect::<Vec<_>>(),
        vec![2, 3]
    );

    Ok(())
}

pub async fn test_create_empty_stream<DB>(adapter: &StreamAdapter<DB>) -> anyhow::Result<()>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    SqlxValues: for<'q> sqlx::IntoArguments<'q, DB>,
    EventRow: for<'r> sqlx::FromRow<'r, DB::Row>,
{
    let name = StreamName::new("empty")?;

    let err = adapter
        .create(Stream::new(name.clone(), vec![]))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::EmptyStream(stream) if stream == name));

    Ok(())
}

pub async fn test_create_schema_twice<DB>(adapter: &StreamAdapter<DB>) -> anyhow::Result<()>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    SqlxValues: for<'q> sqlx::IntoArguments<'q, DB>,
    EventRow: for<'r> sqlx::FromRow<'r, DB::Row>,
{
    let name = StreamName::new("twice")?;

    adapter.create_schema_for(&name, ["tag"]).await?;

    let err = adapter
        .create_schema_for(&name, ["tag"])
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Sqlx(_)));

    Ok(())
}

pub async fn test_duplicate_version<DB>(adapter: &StreamAdapter<DB>) -> anyhow::Result<()>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    SqlxValues: for<'q> sqlx::IntoArguments<'q, DB>,
    EventRow: for<'r> sqlx::FromRow<'r, DB::Row>,
{
    let name = StreamName::new("duplicate")?;

    adapter
        .create(Stream::new(
            name.clone(),
            vec![created("1", "john.doe")?, created("2", "albert.dupont")?],
        ))
        .await?;

    let err = adapter
        .append_to(&name, vec![created("1", "john.doe")?])
        .await
        .unwrap_err();

    assert!(err.is_concurrency());
    assert!(
        matches!(&err, StoreError::Concurrency { table, .. } if table == "duplicate_stream")
    );

    let err = adapter
        .clone()
        .append_to(
            &name,
            vec![user_event(UserEvent::AccountDeleted, "2", 1)],
        )
        .await
        .unwrap_err();

    assert!(err.is_concurrency());

    let stored = adapter.load(&name, None).await?.events;
    let err = adapter
        .append_to(&name, vec![stored[0].clone().version(7)])
        .await
        .unwrap_err();

    // same event id under a free version
    assert!(err.is_concurrency());

    // no transaction: rows before the failing one stay
    let err = adapter
        .append_to(
            &name,
            vec![
                user_event(UserEvent::AccountDeleted, "2", 2),
                user_event(UserEvent::AccountDeleted, "1", 1),
            ],
        )
        .await
        .unwrap_err();

    assert!(err.is_concurrency());

    let stream = adapter.load(&name, None).await?;

    assert_eq!(stream.events.len(), 3);

    // versions are stored as signed 64-bit integers
    let err = adapter
        .append_to(&name, vec![user_event(UserEvent::AccountDeleted, "1", u64::MAX)])
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::TryFromInt(_)));
    assert!(matches!(
        adapter
            .load_events(&name, BTreeMap::<String, String>::new(), Some(u64::MAX))
            .await
            .err(),
        Some(StoreError::TryFromInt(_))
    ));
    assert_eq!(adapter.load(&name, None).await?.events.len(), 3);

    Ok(())
}

pub async fn test_replay_interleaved<DB>(adapter: &StreamAdapter<DB>) -> anyhow::Result<()>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    SqlxValues: for<'q> sqlx::IntoArguments<'q, DB>,
    EventRow: for<'r> sqlx::FromRow<'r, DB::Row>,
{
    let name = StreamName::new("replay")?;

    adapter
        .create(Stream::new(
            name.clone(),
            vec![
                created("a", "a")?.created_at(at(0)),
                user_event(UserEvent::AccountDeleted, "a", 2).created_at(at(20)),
                created("b", "b")?.created_at(at(10)),
            ],
        ))
        .await?;

    let events = adapter
        .replay(&name, None, BTreeMap::<String, String>::new())
        .await?
        .try_collect()
        .await?;

    assert_eq!(
        versions(&events),
        vec![("a".to_owned(), 1), ("b".to_owned(), 1), ("a".to_owned(), 2)]
    );
    assert_eq!(events[1].created_at, at(10));

    let since = adapter
        .replay(&name, Some(at(10)), BTreeMap::<String, String>::new())
        .await?
        .try_collect()
        .await?;

    assert_eq!(versions(&since), vec![("a".to_owned(), 2)]);

    let since = adapter
        .replay(
            &name,
            Some(at(10) - chrono::Duration::microseconds(1)),
            [("aggregate_id", "b")],
        )
        .await?
        .try_collect()
        .await?;

    assert_eq!(versions(&since), vec![("b".to_owned(), 1)]);

    Ok(())
}

pub async fn test_filter_by_metadata<DB>(adapter: &StreamAdapter<DB>) -> anyhow::Result<()>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    SqlxValues: for<'q> sqlx::IntoArguments<'q, DB>,
    EventRow: for<'r> sqlx::FromRow<'r, DB::Row>,
{
    let name = StreamName::new("Catalog\\Subject")?;

    adapter
        .create(Stream::new(
            name.clone(),
            vec![
                created("1", "john")?.metadata("tag", "person"),
                created("2", "rex")?.metadata("tag", "animal"),
                created("3", "jane")?.metadata("tag", "person"),
                created("4", "unknown")?,
            ],
        ))
        .await?;

    let events = adapter
        .load_events(&name, [("tag", "person")], None)
        .await?
        .try_collect()
        .await?;

    assert_eq!(
        events
            .iter()
            .map(|e| e.aggregate_id().unwrap_or_default())
            .collect::<Vec<_>>(),
        vec!["1", "3"]
    );
    assert!(events
        .iter()
        .all(|e| e.metadata.get("tag").map(String::as_str) == Some("person")));

    let untagged = adapter
        .load(&name, None)
        .await?
        .events
        .into_iter()
        .find(|e| e.aggregate_id() == Some("4"))
        .expect("untagged event");

    assert!(!untagged.metadata.contains_key("tag"));

    let numbers = adapter
        .load_events(&name, [("aggregate_id", 2)], None)
        .await?
        .try_collect()
        .await?;

    assert_eq!(versions(&numbers), vec![("2".to_owned(), 1)]);

    Ok(())
}

pub async fn test_restart<DB>(adapter: &StreamAdapter<DB>) -> anyhow::Result<()>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    SqlxValues: for<'q> sqlx::IntoArguments<'q, DB>,
    EventRow: for<'r> sqlx::FromRow<'r, DB::Row>,
{
    let name = StreamName::new("restart")?;
    let events = (1..=5)
        .map(|version| user_event(UserEvent::ProfileUpdated, "1", version))
        .collect::<Vec<_>>();

    adapter.create(Stream::new(name.clone(), events.clone())).await?;

    let mut iterator = adapter
        .load_events(&name, BTreeMap::<String, String>::new(), None)
        .await?;

    assert!(iterator.is_valid());
    assert_eq!(iterator.key(), Some(0));

    iterator.restart().await?;
    assert_eq!(iterator.key(), Some(0));

    let first = iterator.next().await?.expect("first event");
    let second = iterator.next().await?.expect("second event");

    assert_eq!(first.version, 1);
    assert_eq!(second.version, 2);
    assert_eq!(iterator.key(), Some(2));
    assert_eq!(iterator.current()?.map(|e| e.version), Some(3));

    iterator.restart().await?;

    assert_eq!(iterator.key(), Some(0));

    let mut replayed = vec![];
    while let Some(event) = iterator.next().await? {
        replayed.push(event.uuid);
    }

    assert_eq!(replayed, events.iter().map(|e| e.uuid).collect::<Vec<_>>());
    assert!(!iterator.is_valid());
    assert_eq!(iterator.key(), None);
    assert!(iterator.current()?.is_none());

    iterator.advance().await?;
    assert!(!iterator.is_valid());

    iterator.restart().await?;

    let again = iterator.try_collect().await?;

    assert_eq!(
        again.iter().map(|e| e.uuid).collect::<Vec<_>>(),
        replayed
    );

    Ok(())
}

pub async fn test_batched_iteration<DB>(
    adapter: &StreamAdapter<DB>,
    small_batches: &StreamAdapter<DB>,
) -> anyhow::Result<()>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    SqlxValues: for<'q> sqlx::IntoArguments<'q, DB>,
    EventRow: for<'r> sqlx::FromRow<'r, DB::Row>,
{
    let name = StreamName::new("batched")?;
    let events = (1..=150)
        .map(|version| {
            user_event(UserEvent::ProfileUpdated, &format!("{}", version % 3), version)
                .created_at(at(0))
        })
        .collect::<Vec<_>>();

    adapter.create(Stream::new(name.clone(), events)).await?;

    let single = adapter.load(&name, None).await?.events;
    let batched = small_batches.load(&name, None).await?.events;

    assert_eq!(batched.len(), 150);
    assert_eq!(
        batched.iter().map(|e| e.version).collect::<Vec<_>>(),
        (1..=150).collect::<Vec<_>>()
    );
    assert_eq!(batched, single);

    let replayed = small_batches
        .replay(&name, None, BTreeMap::<String, String>::new())
        .await?
        .into_stream()
        .try_collect::<Vec<_>>()
        .await?;

    assert_eq!(replayed.len(), 150);
    assert_eq!(replayed, single);

    // metadata filter and lower bound carried across keyset batches
    let filtered = small_batches
        .load_events(&name, [("aggregate_id", "0")], Some(31))
        .await?
        .try_collect()
        .await?;

    assert_eq!(
        filtered.iter().map(|e| e.version).collect::<Vec<_>>(),
        (33..=150).step_by(3).collect::<Vec<_>>()
    );
    assert!(filtered.iter().all(|e| e.aggregate_id() == Some("0")));

    let later = (1..=20)
        .map(|version| {
            user_event(UserEvent::DisplayNameUpdated, "late", version)
                .created_at(at(version as u32))
        })
        .collect::<Vec<_>>();

    adapter.append_to(&name, later).await?;

    let since = small_batches
        .replay(&name, Some(at(5)), [("aggregate_id", "late")])
        .await?
        .try_collect()
        .await?;

    assert_eq!(
        since.iter().map(|e| e.version).collect::<Vec<_>>(),
        (6..=20).collect::<Vec<_>>()
    );

    let since = small_batches
        .replay(&name, Some(at(0)), BTreeMap::<String, String>::new())
        .await?
        .try_collect()
        .await?;

    assert_eq!(versions(&since).len(), 20);
    assert!(since.iter().all(|e| e.aggregate_id() == Some("late")));

    Ok(())
}

pub async fn test_transactions<DB>(adapter: &StreamAdapter<DB>) -> anyhow::Result<()>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    SqlxValues: for<'q> sqlx::IntoArguments<'q, DB>,
    EventRow: for<'r> sqlx::FromRow<'r, DB::Row>,
{
    let name = StreamName::new("transactions")?;

    adapter.create(Stream::new(name.clone(), vec![created("1", "john")?])).await?;

    assert!(matches!(
        adapter.commit().await.unwrap_err(),
        StoreError::NoTransaction
    ));
    assert!(matches!(
        adapter.rollback().await.unwrap_err(),
        StoreError::NoTransaction
    ));

    adapter.begin_transaction().await?;

    assert!(adapter.in_transaction().await);
    assert!(matches!(
        adapter.begin_transaction().await.unwrap_err(),
        StoreError::TransactionAlreadyStarted
    ));

    adapter
        .append_to(&name, vec![created("2", "albert")?])
        .await?;

    // batches read inside the transaction see its rows
    assert_eq!(adapter.load(&name, None).await?.events.len(), 2);

    adapter.rollback().await?;

    assert!(!adapter.in_transaction().await);
    assert_eq!(adapter.load(&name, None).await?.events.len(), 1);

    let events = vec![created("3", "jane")?, created("1", "john")?];
    let stream = name.clone();
    let err = adapter
        .transactional(move |adapter| {
            Box::pin(async move { adapter.append_to(&stream, events).await })
        })
        .await
        .unwrap_err();

    assert!(err.is_concurrency());
    assert!(!adapter.in_transaction().await);
    assert_eq!(adapter.load(&name, None).await?.events.len(), 1);

    let events = vec![created("3", "jane")?, created("4", "rex")?];
    let stream = name.clone();
    let count = adapter
        .transactional(move |adapter| {
            Box::pin(async move {
                adapter.append_to(&stream, events).await?;

                Ok::<_, StoreError>(adapter.load(&stream, None).await?.events.len())
            })
        })
        .await?;

    assert_eq!(count, 3);
    assert_eq!(adapter.load(&name, None).await?.events.len(), 3);

    Ok(())
}

pub async fn test_transactional_dropped<DB>(adapter: &StreamAdapter<DB>) -> anyhow::Result<()>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    SqlxValues: for<'q> sqlx::IntoArguments<'q, DB>,
    EventRow: for<'r> sqlx::FromRow<'r, DB::Row>,
{
    let name = StreamName::new("dropped")?;

    adapter.create(Stream::new(name.clone(), vec![created("1", "john")?])).await?;

    let (appended, on_appended) = tokio::sync::oneshot::channel();
    let events = vec![user_event(UserEvent::AccountDeleted, "1", 2)];
    let stream = name.clone();
    let unit_of_work = adapter.transactional(move |adapter| {
        Box::pin(async move {
            adapter.append_to(&stream, events).await?;
            let _ = appended.send(());

            futures_util::future::pending::<Result<(), StoreError>>().await
        })
    });

    tokio::select! {
        res = unit_of_work => anyhow::bail!("unit of work completed: {res:?}"),
        res = on_appended => res?,
    }

    assert!(!adapter.in_transaction().await);
    assert_eq!(
        adapter
            .load(&name, None)
            .await?
            .events
            .iter()
            .map(|e| e.version)
            .collect::<Vec<_>>(),
        vec![1]
    );

    adapter.begin_transaction().await?;
    adapter
        .append_to(&name, vec![user_event(UserEvent::AccountDeleted, "1", 2)])
        .await?;
    adapter.commit().await?;

    assert_eq!(adapter.load(&name, None).await?.events.len(), 2);

    Ok(())
}

pub async fn test_schema_dry_run_and_drop<DB>(adapter: &StreamAdapter<DB>) -> anyhow::Result<()>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    SqlxValues: for<'q> sqlx::IntoArguments<'q, DB>,
    EventRow: for<'r> sqlx::FromRow<'r, DB::Row>,
{
    let name = StreamName::new("Shop\\Order-Line")?;

    assert_eq!(adapter.get_table(&name), "order_line_stream");

    let sql = adapter.schema_sql_for(&name, ["tag"])?;

    assert_eq!(sql.len(), 2);
    assert!(sql[0].contains("order_line_stream"));
    assert!(sql[1].contains("order_line_stream_m_v_uix"));

    // dry run leaves the database untouched
    assert!(matches!(
        adapter.load(&name, None).await.unwrap_err(),
        StoreError::Sqlx(_)
    ));

    let err = adapter
        .create_schema_for(&name, ["tag", "payload"])
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::ReservedColumn(key) if key == "payload"));

    adapter.create_schema_for(&name, ["tag"]).await?;
    adapter
        .append_to(&name, vec![created("1", "john")?.metadata("tag", "person")])
        .await?;

    let err = adapter
        .append_to(&name, vec![created("2", "rex")?.metadata("event_name", "x")])
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::ReservedColumn(_)));

    assert!(adapter.drop_schema_sql_for(&name)?.contains("order_line_stream"));

    adapter.drop_schema_for(&name).await?;

    assert!(matches!(
        adapter.load(&name, None).await.unwrap_err(),
        StoreError::Sqlx(_)
    ));

    adapter.create_schema_for(&name, ["tag"]).await?;

    assert!(adapter.load(&name, None).await?.events.is_empty());

    Ok(())
}

pub async fn test_message_registry<DB>(adapter: StreamAdapter<DB>) -> anyhow::Result<()>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    SqlxValues: for<'q> sqlx::IntoArguments<'q, DB>,
    EventRow: for<'r> sqlx::FromRow<'r, DB::Row>,
{
    let name = StreamName::new("registry")?;

    adapter
        .create(Stream::new(
            name.clone(),
            vec![
                created("1", "john")?,
                user_event(UserEvent::AccountDeleted, "1", 2),
            ],
        ))
        .await?;

    let adapter = adapter.with_factory(
        MessageRegistry::default().register(UserEvent::Created.to_string()),
    );

    let mut iterator = adapter
        .load_events(&name, BTreeMap::<String, String>::new(), None)
        .await?;

    assert_eq!(iterator.next().await?.map(|e| e.version), Some(1));
    assert!(matches!(
        iterator.next().await.unwrap_err(),
        StoreError::Factory(_)
    ));

    Ok(())
}
