#[cfg(test)]
pub mod test_db {
    use crate::auth::Role;
    use crate::db::{
        NewUser, add_membership, cancel_scheduled_class, create_gym, create_scheduled_classes,
        create_template, create_user, set_membership_active,
    };
    use crate::error::AppError;
    use crate::models::{NewGym, NewTemplate};
    use chrono::{Local, NaiveDate, NaiveTime};
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::sync::Once;
    use tracing::log::LevelFilter;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        gyms: Vec<TestGym>,
        memberships: Vec<TestMembership>,
        templates: Vec<TestTemplate>,
        classes: Vec<TestClass>,
    }

    pub struct TestUser {
        pub email: String,
        pub first_name: String,
        pub last_name: String,
        pub role: Role,
        pub password: String,
    }

    pub struct TestGym {
        pub name: String,
        pub owner_email: Option<String>,
    }

    pub struct TestMembership {
        pub email: String,
        pub gym: String,
        pub active: bool,
    }

    pub struct TestTemplate {
        pub gym: String,
        pub name: String,
        pub level: Option<String>,
        pub max_capacity: Option<i64>,
    }

    pub struct TestClass {
        pub key: String,
        pub template: Option<String>,
        pub date: NaiveDate,
        pub start_time: NaiveTime,
        pub end_time: NaiveTime,
        pub canceled: bool,
    }

    fn hhmm(value: &str) -> NaiveTime {
        NaiveTime::parse_from_str(value, "%H:%M").expect("test times are HH:MM")
    }

    fn lookup(map: &HashMap<String, i64>, kind: &str, key: &str) -> Result<i64, AppError> {
        map.get(key)
            .copied()
            .ok_or_else(|| AppError::Internal(format!("Unknown test {} '{}'", kind, key)))
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        fn push_user(mut self, email: &str, first_name: &str, role: Role, password: &str) -> Self {
            self.users.push(TestUser {
                email: email.to_string(),
                first_name: first_name.to_string(),
                last_name: "Tester".to_string(),
                role,
                password: password.to_string(),
            });
            self
        }

        pub fn member(self, email: &str, first_name: &str) -> Self {
            self.push_user(email, first_name, Role::Member, STANDARD_PASSWORD)
        }

        pub fn instructor(self, email: &str, first_name: &str) -> Self {
            self.push_user(email, first_name, Role::Instructor, STANDARD_PASSWORD)
        }

        pub fn owner(self, email: &str, first_name: &str) -> Self {
            self.push_user(email, first_name, Role::Owner, STANDARD_PASSWORD)
        }

        pub fn gym(mut self, name: &str) -> Self {
            self.gyms.push(TestGym {
                name: name.to_string(),
                owner_email: None,
            });
            self
        }

        /// A gym owned by an already declared user, who also becomes a member.
        pub fn gym_owned_by(mut self, name: &str, owner_email: &str) -> Self {
            self.gyms.push(TestGym {
                name: name.to_string(),
                owner_email: Some(owner_email.to_string()),
            });
            self
        }

        pub fn membership(mut self, email: &str, gym: &str) -> Self {
            self.memberships.push(TestMembership {
                email: email.to_string(),
                gym: gym.to_string(),
                active: true,
            });
            self
        }

        pub fn inactive_membership(mut self, email: &str, gym: &str) -> Self {
            self.memberships.push(TestMembership {
                email: email.to_string(),
                gym: gym.to_string(),
                active: false,
            });
            self
        }

        pub fn template(mut self, gym: &str, name: &str) -> Self {
            self.templates.push(TestTemplate {
                gym: gym.to_string(),
                name: name.to_string(),
                level: None,
                max_capacity: None,
            });
            self
        }

        pub fn template_with(mut self, gym: &str, name: &str, level: &str, capacity: i64) -> Self {
            self.templates.push(TestTemplate {
                gym: gym.to_string(),
                name: name.to_string(),
                level: Some(level.to_string()),
                max_capacity: Some(capacity),
            });
            self
        }

        /// A class scheduled for today in local time.
        pub fn class_today(self, key: &str, template: &str, start: &str, end: &str) -> Self {
            self.class_on(key, Some(template), Local::now().date_naive(), start, end)
        }

        pub fn canceled_class_today(mut self, key: &str, template: &str, start: &str, end: &str) -> Self {
            self = self.class_today(key, template, start, end);
            if let Some(class) = self.classes.last_mut() {
                class.canceled = true;
            }
            self
        }

        pub fn class_on(
            mut self,
            key: &str,
            template: Option<&str>,
            date: NaiveDate,
            start: &str,
            end: &str,
        ) -> Self {
            self.classes.push(TestClass {
                key: key.to_string(),
                template: template.map(String::from),
                date,
                start_time: hhmm(start),
                end_time: hhmm(end),
                canceled: false,
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .filter_level(LevelFilter::Debug)
                    .is_test(true)
                    .try_init();
            });

            // One connection keeps the in-memory database and its pragmas
            // alive for the whole test.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?;

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|err| AppError::Internal(format!("Test migrations failed: {}", err)))?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut gym_id_map: HashMap<String, i64> = HashMap::new();
            let mut template_id_map: HashMap<String, i64> = HashMap::new();
            let mut class_id_map: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let new_user = NewUser {
                    role: user.role,
                    ..NewUser::member(&user.email, &user.password, &user.first_name, &user.last_name)
                };
                let user_id = create_user(&pool, &new_user).await?;
                user_id_map.insert(user.email.clone(), user_id);
            }

            for gym in &self.gyms {
                let owner_id = match &gym.owner_email {
                    Some(email) => Some(lookup(&user_id_map, "user", email)?),
                    None => None,
                };
                let slug = gym.name.to_lowercase().replace(' ', "-");
                let new_gym = NewGym {
                    name: gym.name.clone(),
                    email: format!("info@{}.test", slug),
                    phone_number: "555-0100".to_string(),
                    street_line1: "1 Mat Lane".to_string(),
                    street_line2: String::new(),
                    city: "Springfield".to_string(),
                    state: "IL".to_string(),
                    postal_code: "62701".to_string(),
                    country: "US".to_string(),
                    schedule: vec![],
                };
                let created = create_gym(&pool, &new_gym, owner_id).await?;
                gym_id_map.insert(gym.name.clone(), created.id);
            }

            for membership in &self.memberships {
                let user_id = lookup(&user_id_map, "user", &membership.email)?;
                let gym_id = lookup(&gym_id_map, "gym", &membership.gym)?;
                add_membership(&pool, user_id, gym_id).await?;
                if !membership.active {
                    set_membership_active(&pool, user_id, gym_id, false).await?;
                }
            }

            for template in &self.templates {
                let gym_id = lookup(&gym_id_map, "gym", &template.gym)?;
                let created = create_template(
                    &pool,
                    &NewTemplate {
                        gym_id,
                        name: template.name.clone(),
                        description: None,
                        duration_minutes: None,
                        max_capacity: template.max_capacity,
                        level: template.level.clone(),
                    },
                )
                .await?;
                template_id_map.insert(template.name.clone(), created.id);
            }

            for class in &self.classes {
                let class_id = match &class.template {
                    Some(template) => {
                        let template_id = lookup(&template_id_map, "template", template)?;
                        let scheduled = create_scheduled_classes(
                            &pool,
                            template_id,
                            class.date,
                            class.start_time,
                            class.end_time,
                            None,
                            0,
                        )
                        .await?;
                        scheduled
                            .first()
                            .map(|c| c.id)
                            .ok_or_else(|| AppError::Internal("No class scheduled".to_string()))?
                    }
                    None => sqlx::query(
                        "INSERT INTO scheduled_classes (template_id, date, start_time, end_time)
                         VALUES (NULL, ?, ?, ?)",
                    )
                    .bind(class.date)
                    .bind(class.start_time)
                    .bind(class.end_time)
                    .execute(&pool)
                    .await?
                    .last_insert_rowid(),
                };

                if class.canceled {
                    cancel_scheduled_class(&pool, class_id).await?;
                }
                class_id_map.insert(class.key.clone(), class_id);
            }

            Ok(TestDb {
                pool,
                user_id_map,
                gym_id_map,
                template_id_map,
                class_id_map,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub gym_id_map: HashMap<String, i64>,
        pub template_id_map: HashMap<String, i64>,
        pub class_id_map: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn user_id(&self, email: &str) -> Option<i64> {
            self.user_id_map.get(email).copied()
        }

        pub fn gym_id(&self, name: &str) -> Option<i64> {
            self.gym_id_map.get(name).copied()
        }

        pub fn template_id(&self, name: &str) -> Option<i64> {
            self.template_id_map.get(name).copied()
        }

        pub fn class_id(&self, key: &str) -> Option<i64> {
            self.class_id_map.get(key).copied()
        }

        /// Inserts a class whose template id points at no row, the state left
        /// behind by data written before templates were detached on delete.
        pub async fn insert_dangling_class(
            &self,
            template_id: i64,
            date: NaiveDate,
            start: &str,
            end: &str,
        ) -> Result<i64, AppError> {
            sqlx::query("PRAGMA foreign_keys = OFF")
                .execute(&self.pool)
                .await?;

            let id = sqlx::query(
                "INSERT INTO scheduled_classes (template_id, date, start_time, end_time)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(template_id)
            .bind(date)
            .bind(hhmm(start))
            .bind(hhmm(end))
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

            sqlx::query("PRAGMA foreign_keys = ON")
                .execute(&self.pool)
                .await?;

            Ok(id)
        }
    }

    /// Two gyms, a member and an instructor of the first, and today's
    /// timetable for both.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .member("alice@example.com", "Alice")
            .instructor("coach@example.com", "Casey")
            .owner("owner@example.com", "Olive")
            .member("bob@example.com", "Bob")
            .gym_owned_by("Northside BJJ", "owner@example.com")
            .gym("Southside Judo")
            .membership("alice@example.com", "Northside BJJ")
            .membership("coach@example.com", "Northside BJJ")
            .membership("bob@example.com", "Southside Judo")
            .template_with("Northside BJJ", "Fundamentals", "Beginner", 12)
            .template("Southside Judo", "Randori")
            .class_today("evening", "Fundamentals", "18:00", "19:00")
            .class_today("morning", "Fundamentals", "07:00", "08:00")
            .class_today("judo", "Randori", "12:00", "13:00")
            .canceled_class_today("canceled", "Fundamentals", "20:00", "21:00")
            .build()
            .await
            .expect("Failed to build standard test database")
    }
}

#[cfg(test)]
pub mod test_client {
    use super::test_db::TestDb;
    use crate::env::AppConfig;
    use crate::error::AppError;
    use crate::init_rocket;
    use crate::mailer::Mailer;
    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    pub const TEST_CLIENT_IP: &str = "10.0.0.7";

    #[derive(Clone, Debug)]
    pub struct SentMail {
        pub to: String,
        pub subject: String,
        pub body: String,
    }

    /// Keeps every message in memory so tests can inspect it.
    #[derive(Clone, Default)]
    pub struct RecordingMailer {
        sent: Arc<Mutex<Vec<SentMail>>>,
    }

    impl RecordingMailer {
        pub fn sent(&self) -> Vec<SentMail> {
            self.sent.lock().expect("mailer lock").clone()
        }
    }

    #[rocket::async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
            self.sent.lock().expect("mailer lock").push(SentMail {
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
            Ok(())
        }
    }

    pub struct FailingMailer;

    #[rocket::async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), AppError> {
            Err(AppError::ExternalService("SMTP relay refused connection".to_string()))
        }
    }

    pub fn test_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            qr_logo_path: "static/does-not-exist.png".to_string(),
            ..AppConfig::default()
        }
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let (client, test_db, _) = setup_test_client_with_mailer(test_db).await;
        (client, test_db)
    }

    pub async fn setup_test_client_with_mailer(test_db: TestDb) -> (Client, TestDb, RecordingMailer) {
        let mailer = RecordingMailer::default();
        let client = client_for(&test_db, test_config(), Box::new(mailer.clone())).await;
        (client, test_db, mailer)
    }

    pub async fn client_for(test_db: &TestDb, config: AppConfig, mailer: Box<dyn Mailer>) -> Client {
        let rocket = init_rocket(test_db.pool.clone(), config, mailer).await;
        Client::tracked(rocket)
            .await
            .expect("valid rocket instance")
    }

    pub async fn login_test_user(client: &Client, email: &str, password: &str) -> Status {
        client
            .post("/auth/login")
            .header(ContentType::JSON)
            .header(Header::new("X-Real-IP", TEST_CLIENT_IP))
            .body(json!({ "email": email, "password": password }).to_string())
            .dispatch()
            .await
            .status()
    }
}
