#[cfg(test)]
mod tests {
    use crate::db::{
        count_attendance_for_class, delete_template, find_user_by_email, get_attendance_history,
        record_check_in,
    };
    use crate::error::AppError;
    use crate::test::test_db::{TestDbBuilder, create_standard_test_db};
    use chrono::Local;
    use rocket::tokio;

    #[tokio::test]
    async fn test_check_in_records_once() {
        let test_db = create_standard_test_db().await;
        let gym_id = test_db.gym_id("Northside BJJ").expect("Gym not found");
        let class_id = test_db.class_id("evening").expect("Class not found");

        let first = record_check_in(&test_db.pool, "alice@example.com", class_id, Some(gym_id))
            .await
            .expect("First check-in failed");

        assert!(!first.already_checked_in);
        assert_eq!(first.student_name, "Alice Tester");
        assert_eq!(first.class_name, "Fundamentals");
        assert_eq!(first.date, Local::now().date_naive());

        let second = record_check_in(&test_db.pool, "alice@example.com", class_id, Some(gym_id))
            .await
            .expect("Repeat check-in failed");

        assert!(second.already_checked_in);
        assert_eq!(
            second.checkin_time, first.checkin_time,
            "Repeat check-in should report the original time"
        );

        let count = count_attendance_for_class(&test_db.pool, class_id)
            .await
            .expect("Failed to count attendance");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_check_ins_converge() {
        let test_db = create_standard_test_db().await;
        let class_id = test_db.class_id("morning").expect("Class not found");

        let (a, b) = tokio::join!(
            record_check_in(&test_db.pool, "alice@example.com", class_id, Some(1)),
            record_check_in(&test_db.pool, "alice@example.com", class_id, Some(1)),
        );
        let a = a.expect("First concurrent check-in failed");
        let b = b.expect("Second concurrent check-in failed");

        assert_ne!(a.already_checked_in, b.already_checked_in);
        assert_eq!(a.checkin_time, b.checkin_time);

        let count = count_attendance_for_class(&test_db.pool, class_id)
            .await
            .expect("Failed to count attendance");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_canceled_class_rejects_check_in() {
        let test_db = create_standard_test_db().await;
        let class_id = test_db.class_id("canceled").expect("Class not found");

        let result = record_check_in(&test_db.pool, "alice@example.com", class_id, None).await;

        match result {
            Err(AppError::Conflict(msg)) => assert_eq!(msg, "This class has been canceled"),
            other => panic!("Expected Conflict, got {:?}", other),
        }

        let count = count_attendance_for_class(&test_db.pool, class_id)
            .await
            .expect("Failed to count attendance");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_class_from_another_gym_is_rejected() {
        let test_db = create_standard_test_db().await;
        let northside = test_db.gym_id("Northside BJJ").expect("Gym not found");
        let judo_class = test_db.class_id("judo").expect("Class not found");

        let result =
            record_check_in(&test_db.pool, "alice@example.com", judo_class, Some(northside)).await;

        assert!(
            matches!(result, Err(AppError::Validation(_))),
            "Expected Validation error, got {:?}",
            result
        );
        assert_eq!(
            count_attendance_for_class(&test_db.pool, judo_class)
                .await
                .expect("Failed to count attendance"),
            0
        );
    }

    #[tokio::test]
    async fn test_membership_required_when_gym_given() {
        let test_db = create_standard_test_db().await;
        let northside = test_db.gym_id("Northside BJJ").expect("Gym not found");
        let class_id = test_db.class_id("evening").expect("Class not found");

        let result =
            record_check_in(&test_db.pool, "bob@example.com", class_id, Some(northside)).await;
        assert!(
            matches!(result, Err(AppError::Authorization(_))),
            "Expected Authorization error, got {:?}",
            result
        );

        // Without a gym there is nothing to check membership against.
        let confirmation = record_check_in(&test_db.pool, "bob@example.com", class_id, None)
            .await
            .expect("Check-in without gym should succeed");
        assert!(!confirmation.already_checked_in);
    }

    #[tokio::test]
    async fn test_inactive_membership_is_rejected() {
        let test_db = TestDbBuilder::new()
            .member("lapsed@example.com", "Lee")
            .gym("Eastside MMA")
            .inactive_membership("lapsed@example.com", "Eastside MMA")
            .template("Eastside MMA", "Sparring")
            .class_today("sparring", "Sparring", "19:00", "20:00")
            .build()
            .await
            .expect("Failed to build test database");

        let gym_id = test_db.gym_id("Eastside MMA").expect("Gym not found");
        let class_id = test_db.class_id("sparring").expect("Class not found");

        let result =
            record_check_in(&test_db.pool, "lapsed@example.com", class_id, Some(gym_id)).await;
        assert!(matches!(result, Err(AppError::Authorization(_))));
    }

    #[tokio::test]
    async fn test_unknown_student_and_class() {
        let test_db = create_standard_test_db().await;
        let class_id = test_db.class_id("evening").expect("Class not found");

        match record_check_in(&test_db.pool, "nobody@example.com", class_id, None).await {
            Err(AppError::NotFound(msg)) => assert_eq!(msg, "Student not found"),
            other => panic!("Expected NotFound, got {:?}", other),
        }

        match record_check_in(&test_db.pool, "alice@example.com", 9999, None).await {
            Err(AppError::NotFound(msg)) => assert_eq!(msg, "Class not found"),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_archived_student_cannot_check_in() {
        let test_db = create_standard_test_db().await;
        let class_id = test_db.class_id("evening").expect("Class not found");

        sqlx::query("UPDATE users SET archived = TRUE WHERE email = ?")
            .bind("alice@example.com")
            .execute(&test_db.pool)
            .await
            .expect("Failed to archive user");

        match record_check_in(&test_db.pool, "alice@example.com", class_id, None).await {
            Err(AppError::NotFound(msg)) => assert_eq!(msg, "Student not found"),
            other => panic!("Expected NotFound, got {:?}", other),
        }

        let count = count_attendance_for_class(&test_db.pool, class_id)
            .await
            .expect("Failed to count attendance");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_detached_class_rejects_check_in() {
        let test_db = create_standard_test_db().await;
        let template_id = test_db.template_id("Randori").expect("Template not found");
        let class_id = test_db.class_id("judo").expect("Class not found");

        delete_template(&test_db.pool, template_id)
            .await
            .expect("Failed to delete template");

        match record_check_in(&test_db.pool, "bob@example.com", class_id, None).await {
            Err(AppError::NotFound(msg)) => assert_eq!(msg, "Class template not found"),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_history_lists_latest_first() {
        let test_db = create_standard_test_db().await;
        let morning = test_db.class_id("morning").expect("Class not found");
        let evening = test_db.class_id("evening").expect("Class not found");

        record_check_in(&test_db.pool, "alice@example.com", morning, None)
            .await
            .expect("Morning check-in failed");
        record_check_in(&test_db.pool, "alice@example.com", evening, None)
            .await
            .expect("Evening check-in failed");

        let alice = find_user_by_email(&test_db.pool, "alice@example.com")
            .await
            .expect("Lookup failed")
            .expect("Alice not found");

        let history = get_attendance_history(&test_db.pool, alice.id)
            .await
            .expect("Failed to load history");

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, evening);
        assert_eq!(history[0].start_time.as_deref(), Some("18:00"));
        assert_eq!(history[1].id, morning);
        assert_eq!(history[1].class_name, "Fundamentals");
    }
}
