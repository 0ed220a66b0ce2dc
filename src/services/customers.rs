use crate::{
    entities::customer::{self, Entity as CustomerEntity, Model as CustomerModel},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Customer upsert keyed on the external buyer reference.
#[derive(Clone)]
pub struct CustomerService {
    db: Arc<DatabaseConnection>,
}

impl CustomerService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Returns the customer row for a buyer reference, creating it on
    /// first sight. Guest checkouts pass an empty reference and get a
    /// synthesized one so every settled order has an owner.
    #[instrument(skip(self))]
    pub async fn ensure_customer(
        &self,
        customer_ref: &str,
        name: &str,
        phone: Option<&str>,
    ) -> Result<CustomerModel, ServiceError> {
        let external_ref = if customer_ref.trim().is_empty() {
            format!("guest-{}", Uuid::new_v4())
        } else {
            customer_ref.trim().to_string()
        };

        if let Some(existing) = CustomerEntity::find()
            .filter(customer::Column::ExternalRef.eq(external_ref.as_str()))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
        {
            return Ok(existing);
        }

        let model = customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            external_ref: Set(external_ref.clone()),
            name: Set(name.to_string()),
            phone: Set(phone.map(|p| p.to_string())),
            email: Set(None),
            created_at: Set(Utc::now()),
        };

        match model.insert(&*self.db).await {
            Ok(created) => {
                info!(customer_id = %created.id, "customer created");
                Ok(created)
            }
            // Two settlements for the same new buyer can race the unique
            // index on external_ref; re-read the winner.
            Err(e) => CustomerEntity::find()
                .filter(customer::Column::ExternalRef.eq(external_ref.as_str()))
                .one(&*self.db)
                .await
                .map_err(ServiceError::DatabaseError)?
                .ok_or(ServiceError::DatabaseError(e)),
        }
    }
}
