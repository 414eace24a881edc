use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::Storage;
use crate::mining::{AdBoostUpdate, ClaimUpdate, ReferralUpdate};
use crate::models::{
    activities::{Activity, NewActivity},
    ad_views::{AdView, NewAdView},
    profiles::{NewProfile, Profile},
    referrals::Referral,
};
use crate::settings;

const PROFILE_COLUMNS: &str = r#"
    p.id, p.email, p.display_name, p.photo_url, p.balance, p.referral_code,
    p.referred_by, p.last_claim_at, p.next_claim_at, p.ad_boost_end_time,
    p.created_at, p.updated_at,
    (SELECT COUNT(*) FROM referrals r WHERE r.referrer_id = p.id) AS referral_count
"#;

#[derive(Clone)]
pub struct PostgresRepository {
    conn: PgPool,
}

impl PostgresRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }

    /// Connects and brings the schema up to date.
    pub async fn connect(config: &settings::Postgres) -> Result<Self, anyhow::Error> {
        let conn = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        sqlx::migrate!("./migrations").run(&conn).await?;
        log::info!("Database migrations applied.");

        Ok(Self::new(conn))
    }

    async fn insert_activity(
        tx: &mut Transaction<'_, Postgres>,
        activity: NewActivity,
    ) -> Result<Activity, anyhow::Error> {
        let activity = sqlx::query_as::<_, Activity>(
            r#"
            INSERT INTO activities (id, user_id, kind, amount, details, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().hyphenated().to_string())
        .bind(&activity.user_id)
        .bind(activity.kind.as_str())
        .bind(&activity.amount)
        .bind(&activity.details)
        .bind(&activity.metadata)
        .fetch_one(&mut **tx)
        .await?;

        Ok(activity)
    }
}

#[async_trait]
impl Storage for PostgresRepository {
    async fn get_profile(&self, id: &str) -> Result<Option<Profile>, anyhow::Error> {
        let profile = sqlx::query_as::<_, Profile>(&format!(
            "SELECT {} FROM profiles p WHERE p.id = $1",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(profile)
    }

    async fn get_profile_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<Profile>, anyhow::Error> {
        let profile = sqlx::query_as::<_, Profile>(&format!(
            "SELECT {} FROM profiles p WHERE p.referral_code = $1",
            PROFILE_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.conn)
        .await?;

        Ok(profile)
    }

    async fn create_profile(&self, profile: NewProfile) -> Result<(Profile, bool), anyhow::Error> {
        let inserted: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO profiles (id, email, display_name, photo_url, referral_code)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.email)
        .bind(&profile.display_name)
        .bind(&profile.photo_url)
        .bind(&profile.referral_code)
        .fetch_optional(&self.conn)
        .await?;

        let stored = self
            .get_profile(&profile.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Profile {} vanished after insert", profile.id))?;

        Ok((stored, inserted.is_some()))
    }

    async fn apply_claim(
        &self,
        id: &str,
        update: &ClaimUpdate,
        activity: NewActivity,
    ) -> Result<Option<Activity>, anyhow::Error> {
        let mut tx = self.conn.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET balance = $1, last_claim_at = $2, next_claim_at = $3, updated_at = CURRENT_TIMESTAMP
            WHERE id = $4 AND next_claim_at IS NOT DISTINCT FROM $5
            "#,
        )
        .bind(update.balance)
        .bind(update.last_claim_at)
        .bind(update.next_claim_at)
        .bind(id)
        .bind(update.expected_next_claim_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let activity = Self::insert_activity(&mut tx, activity).await?;
        tx.commit().await?;

        Ok(Some(activity))
    }

    async fn apply_ad_boost(
        &self,
        id: &str,
        update: &AdBoostUpdate,
        activity: NewActivity,
        ad_view: NewAdView,
    ) -> Result<Option<Activity>, anyhow::Error> {
        let mut tx = self.conn.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET ad_boost_end_time = $1, updated_at = CURRENT_TIMESTAMP
            WHERE id = $2 AND ad_boost_end_time IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(update.ad_boost_end_time)
        .bind(id)
        .bind(update.expected_ad_boost_end_time)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            r#"
            INSERT INTO ad_views (id, user_id, ad_type, boost_amount, boost_duration_secs)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4().hyphenated().to_string())
        .bind(&ad_view.user_id)
        .bind(&ad_view.ad_type)
        .bind(ad_view.boost_amount)
        .bind(ad_view.boost_duration_secs)
        .execute(&mut *tx)
        .await?;

        let activity = Self::insert_activity(&mut tx, activity).await?;
        tx.commit().await?;

        Ok(Some(activity))
    }

    async fn apply_referral(
        &self,
        update: &ReferralUpdate,
        activity: NewActivity,
    ) -> Result<Option<Activity>, anyhow::Error> {
        let mut tx = self.conn.begin().await?;

        let stamped = sqlx::query(
            r#"
            UPDATE profiles
            SET referred_by = $1, updated_at = CURRENT_TIMESTAMP
            WHERE id = $2 AND referred_by IS NULL
            "#,
        )
        .bind(&update.referrer_id)
        .bind(&update.referred_id)
        .execute(&mut *tx)
        .await?;

        if stamped.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO referrals (id, referrer_id, referred_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (referred_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().hyphenated().to_string())
        .bind(&update.referrer_id)
        .bind(&update.referred_id)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let activity = Self::insert_activity(&mut tx, activity).await?;
        tx.commit().await?;

        Ok(Some(activity))
    }

    async fn get_referrals(&self, referrer_id: &str) -> Result<Vec<Referral>, anyhow::Error> {
        let referrals = sqlx::query_as::<_, Referral>(
            "SELECT * FROM referrals WHERE referrer_id = $1 ORDER BY created_at DESC",
        )
        .bind(referrer_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(referrals)
    }

    async fn get_activities(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<Activity>, anyhow::Error> {
        let activities = sqlx::query_as::<_, Activity>(
            "SELECT * FROM activities WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.conn)
        .await?;

        Ok(activities)
    }

    async fn get_ad_views(&self, user_id: &str) -> Result<Vec<AdView>, anyhow::Error> {
        let ad_views = sqlx::query_as::<_, AdView>(
            "SELECT * FROM ad_views WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(ad_views)
    }
}
