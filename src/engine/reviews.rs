use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::now_ms;
use super::{Engine, EngineError};

impl Engine {
    /// One immutable review per completed booking, written by its driver.
    pub async fn post_review(
        &self,
        caller_id: Ulid,
        id: Ulid,
        booking_id: Ulid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Review, EngineError> {
        let caller = self.caller(&caller_id)?;
        if !(1..=5).contains(&rating) {
            return Err(EngineError::Validation("rating must be between 1 and 5"));
        }
        if comment.as_ref().is_some_and(|c| c.len() > MAX_COMMENT_LEN) {
            return Err(EngineError::LimitExceeded("comment too long"));
        }

        let mut guard = self.resolve_entity_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.driver_id != caller.id {
            return Err(EngineError::Forbidden("only the booking's driver can review it"));
        }
        if booking.status != BookingStatus::Completed {
            return Err(EngineError::InvalidState("booking is not completed"));
        }
        if let Some(existing) = guard.review_for(booking_id) {
            return Err(EngineError::AlreadyExists(existing.id));
        }

        let review = Review {
            id,
            booking_id,
            spot_id: guard.id(),
            driver_id: caller.id,
            rating,
            comment,
            created_at: now_ms(),
        };
        let homeowner_id = guard.spot.owner_id;
        self.persist_new(&mut guard, id, &Event::ReviewPosted { review: review.clone() })
            .await?;
        drop(guard);
        self.notify_user(
            homeowner_id,
            EntityKind::Spot,
            review.spot_id,
            format!("new {rating}-star review"),
        );
        Ok(review)
    }

    /// Reviews of a spot, oldest first.
    pub async fn reviews_for_spot(&self, spot_id: Ulid) -> Result<Vec<Review>, EngineError> {
        let shard = self.spot_shard(&spot_id)?;
        let guard = shard.read().await;
        Ok(guard.reviews.clone())
    }

    pub async fn rating_summary(&self, spot_id: Ulid) -> Result<RatingSummary, EngineError> {
        let shard = self.spot_shard(&spot_id)?;
        let guard = shard.read().await;
        Ok(summarize(&guard.reviews))
    }
}

fn summarize(reviews: &[Review]) -> RatingSummary {
    let count = reviews.len();
    let average = (count > 0).then(|| {
        let total: u32 = reviews.iter().map(|r| u32::from(r.rating)).sum();
        f64::from(total) / count as f64
    });
    RatingSummary { count, average }
}
