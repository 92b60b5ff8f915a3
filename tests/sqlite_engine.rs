use rust_record::{
    ConnectionId, EngineError, Params, Record, RecordError, SqliteConfig, SqliteEngine, Value,
};
use std::sync::Arc;
use tempfile::NamedTempFile;

const USERS_SCHEMA: &str = r#"
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT UNIQUE NOT NULL,
        age INTEGER
    );
    CREATE INDEX idx_users_email ON users(email);
"#;

// Helper function to create an in-memory engine with the users table
async fn create_test_engine() -> SqliteEngine {
    let engine = SqliteEngine::open(SqliteConfig::in_memory()).unwrap();
    engine
        .execute_batch(ConnectionId::DEFAULT, USERS_SCHEMA)
        .await
        .unwrap();
    engine
}

fn user_record(connection: ConnectionId) -> Record {
    Record::for_key(&["id", "name", "email", "age"], "users", "id", connection)
}

async fn insert_user(engine: &SqliteEngine, name: &str, email: &str, age: i64) -> i64 {
    let mut user = user_record(ConnectionId::DEFAULT);
    user.set_data([
        ("id", Value::Integer(0)),
        ("name", Value::from(name)),
        ("email", Value::from(email)),
        ("age", Value::Integer(age)),
    ]);
    assert!(user.add(engine, false).await.unwrap());
    user.get_column("id").unwrap().as_i64().unwrap()
}

#[tokio::test]
async fn test_basic_operations() {
    let engine = create_test_engine().await;

    // Insert a new user
    let id = insert_user(&engine, "John Doe", "john@example.com", 30).await;
    assert_eq!(id, 1);

    // Load it through a fresh record
    let mut user = user_record(ConnectionId::DEFAULT);
    assert!(user.load(&engine, Some(id)).await.unwrap());
    assert!(user.is_loaded());
    assert_eq!(user.get_column("name").unwrap(), &Value::from("John Doe"));
    assert_eq!(user.get_column("email").unwrap(), &Value::from("john@example.com"));
    assert_eq!(user.get_column("age").unwrap(), &Value::Integer(30));

    // Update the user
    user.set_column("age", 31);
    assert!(user.save(&engine, false).await.unwrap());
    let mut reloaded = user_record(ConnectionId::DEFAULT);
    assert!(reloaded.load(&engine, Some(id)).await.unwrap());
    assert_eq!(reloaded.get_column("age").unwrap(), &Value::Integer(31));

    // Delete the user
    assert!(user.is_record(&engine).await.unwrap());
    assert!(user.delete(&engine, false).await.unwrap());
    assert!(!user.is_record(&engine).await.unwrap());
    assert!(!user.delete(&engine, false).await.unwrap());
    assert!(!reloaded.load(&engine, None).await.unwrap());
    assert!(!reloaded.is_loaded());
}

#[tokio::test]
async fn test_ignore_errors_on_constraint_violation() {
    let engine = create_test_engine().await;
    insert_user(&engine, "John Doe", "john@example.com", 30).await;

    let mut duplicate = user_record(ConnectionId::DEFAULT);
    duplicate.set_data([
        ("id", Value::Integer(0)),
        ("name", Value::from("Jane Doe")),
        ("email", Value::from("john@example.com")),
    ]);

    assert!(!duplicate.add(&engine, true).await.unwrap());
    assert_eq!(duplicate.get_column("id").unwrap(), &Value::Integer(0));

    let err = duplicate.add(&engine, false).await.unwrap_err();
    assert!(matches!(err, RecordError::Engine(EngineError::Sqlite(_))));
}

#[tokio::test]
async fn test_ignored_update_conflict_reports_no_rows() {
    let engine = create_test_engine().await;
    insert_user(&engine, "John Doe", "john@example.com", 30).await;
    let jane = insert_user(&engine, "Jane Doe", "jane@example.com", 28).await;

    let mut user = user_record(ConnectionId::DEFAULT);
    assert!(user.load(&engine, Some(jane)).await.unwrap());
    user.set_column("email", "john@example.com");

    assert!(!user.save(&engine, true).await.unwrap());
    assert!(user.save(&engine, false).await.is_err());
}

#[tokio::test]
async fn test_ignore_errors_keeps_non_constraint_failures() {
    let engine = create_test_engine().await;
    let mut missing =
        Record::for_key(&["id", "name"], "no_such_table", "id", ConnectionId::DEFAULT);
    missing.set_column("id", 1);
    missing.set_column("name", "Ada");

    let err = missing.delete(&engine, true).await.unwrap_err();
    assert!(matches!(err, RecordError::Engine(EngineError::Sqlite(_))));
    let err = missing.save(&engine, true).await.unwrap_err();
    assert!(matches!(err, RecordError::Engine(EngineError::Sqlite(_))));
    let err = missing.add(&engine, true).await.unwrap_err();
    assert!(matches!(err, RecordError::Engine(EngineError::Sqlite(_))));
}

#[tokio::test]
async fn test_ignored_delete_of_referenced_row() {
    let engine = create_test_engine().await;
    engine
        .execute_batch(
            ConnectionId::DEFAULT,
            "PRAGMA foreign_keys = ON;
             CREATE TABLE posts (
                 id INTEGER PRIMARY KEY,
                 user_id INTEGER NOT NULL REFERENCES users(id)
             );",
        )
        .await
        .unwrap();
    let id = insert_user(&engine, "John Doe", "john@example.com", 30).await;

    let mut post = Record::for_key(&["id", "user_id"], "posts", "id", ConnectionId::DEFAULT);
    post.set_data([("id", 0), ("user_id", id)]);
    assert!(post.add(&engine, false).await.unwrap());

    // DELETE has no OR IGNORE form; the engine drops the foreign key failure.
    let mut user = user_record(ConnectionId::DEFAULT);
    user.set_column("id", id);
    assert!(!user.delete(&engine, true).await.unwrap());
    assert!(user.is_record(&engine).await.unwrap());

    let err = user.delete(&engine, false).await.unwrap_err();
    assert!(matches!(err, RecordError::Engine(EngineError::Sqlite(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_receive_their_own_ids() {
    let engine = Arc::new(create_test_engine().await);

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            let mut mismatched = 0;
            for i in 0..100 {
                let email = format!("user{worker}-{i}@example.com");
                let id = insert_user(&engine, "Worker", &email, i).await;

                let mut stored = user_record(ConnectionId::DEFAULT);
                assert!(stored.load(engine.as_ref(), Some(id)).await.unwrap());
                if stored.get_column("email").unwrap() != &Value::from(email.as_str()) {
                    mismatched += 1;
                }
            }
            mismatched
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), 0);
    }
}

#[tokio::test]
async fn test_fragment_limits_writes_to_one_row() {
    let engine = create_test_engine().await;
    insert_user(&engine, "John Doe", "john@example.com", 30).await;
    insert_user(&engine, "Jane Doe", "jane@example.com", 30).await;

    // Both rows match the filter; only one may change.
    let mut adult = Record::new(
        &["name", "email", "age"],
        "users",
        "id",
        ConnectionId::DEFAULT,
        Params::new().with_value("age", 30),
        "WHERE age = :age ORDER BY id;",
    );
    adult.set_column("id", 1);
    assert!(adult.load(&engine, None).await.unwrap());
    assert_eq!(adult.get_column("name").unwrap(), &Value::from("John Doe"));

    adult.set_column("age", 40);
    assert!(adult.save(&engine, false).await.unwrap());

    let mut jane = user_record(ConnectionId::DEFAULT);
    assert!(jane.load(&engine, Some(2)).await.unwrap());
    assert_eq!(jane.get_column("age").unwrap(), &Value::Integer(30));
}

#[tokio::test]
async fn test_numbered_connection_on_file_database() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();
    let archive = ConnectionId(2);

    let engine =
        SqliteEngine::open(SqliteConfig::in_memory().with_connection(archive, path)).unwrap();
    engine.execute_batch(archive, USERS_SCHEMA).await.unwrap();

    let mut user = user_record(archive);
    user.set_data([
        ("id", Value::Integer(0)),
        ("name", Value::from("Ada")),
        ("email", Value::from("ada@example.com")),
    ]);
    assert!(user.add(&engine, false).await.unwrap());
    assert_eq!(user.get_column("id").unwrap(), &Value::Integer(1));
    assert!(user.is_record(&engine).await.unwrap());

    // The default connection has no users table.
    let mut elsewhere = user_record(ConnectionId::DEFAULT);
    assert!(elsewhere.load(&engine, Some(1)).await.is_err());
}

#[tokio::test]
async fn test_unknown_connection_is_reported() {
    let engine = create_test_engine().await;
    let mut user = user_record(ConnectionId(5));
    user.set_column("id", 1);

    let err = user.is_record(&engine).await.unwrap_err();
    assert!(matches!(
        err,
        RecordError::Engine(EngineError::UnknownConnection(5))
    ));
}
