//! Endpoint and subscription management.
//!
//! Provides creation with URL, SSRF and filter validation, lookups, and the
//! status toggles that cancel future claims of a subscription's deliveries.

use serde::Deserialize;

use courier_core::{ApplicationId, EndpointId, GroupId, SourceId, SubscriptionId};

use crate::error::WebhookError;
use crate::models::{
    AlertConfiguration, Endpoint, EndpointStatus, FilterConfiguration, RetryConfiguration,
    Subscription, SubscriptionStatus,
};
use crate::services::{ensure_group, StoreResultExt};
use crate::store::Stores;
use crate::validation;

/// Input for registering an endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateEndpoint {
    pub app_id: ApplicationId,
    pub target_url: String,
    #[serde(default)]
    pub secret: Option<String>,
}

/// Input for creating a subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscription {
    pub name: String,
    pub endpoint_id: EndpointId,
    #[serde(default)]
    pub source_id: Option<SourceId>,
    #[serde(default)]
    pub filter_config: Option<FilterConfiguration>,
    #[serde(default)]
    pub retry_config: Option<RetryConfiguration>,
    #[serde(default)]
    pub alert_config: Option<AlertConfiguration>,
}

/// Edit of a subscription. Unset fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSubscription {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub filter_config: Option<FilterConfiguration>,
    #[serde(default)]
    pub retry_config: Option<RetryConfiguration>,
    #[serde(default)]
    pub alert_config: Option<AlertConfiguration>,
}

fn validate_retry(retry: &RetryConfiguration) -> Result<(), WebhookError> {
    if retry.retry_count == 0 {
        return Err(WebhookError::Validation(
            "Retry count must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Service for endpoint and subscription operations.
#[derive(Clone)]
pub struct SubscriptionService {
    stores: Stores,
    allow_private: bool,
}

impl SubscriptionService {
    #[must_use]
    pub fn new(stores: Stores) -> Self {
        Self {
            stores,
            allow_private: false,
        }
    }

    /// Accept HTTP and internal endpoint URLs (for development/testing).
    #[must_use]
    pub fn with_allow_private(mut self, allow: bool) -> Self {
        self.allow_private = allow;
        self
    }

    pub async fn create_endpoint(
        &self,
        group_id: GroupId,
        request: CreateEndpoint,
    ) -> Result<Endpoint, WebhookError> {
        validation::validate_target_url(&request.target_url, self.allow_private)?;

        let mut endpoint = Endpoint::new(request.app_id, group_id, request.target_url);
        if let Some(secret) = request.secret.filter(|s| !s.is_empty()) {
            endpoint = endpoint.with_secret(secret);
        }
        self.stores.endpoints.create_endpoint(&endpoint).await?;

        tracing::info!(
            target: "webhook_subscription",
            endpoint_id = %endpoint.id,
            app_id = %endpoint.app_id,
            group_id = %group_id,
            "Endpoint created"
        );
        Ok(endpoint)
    }

    pub async fn set_endpoint_status(
        &self,
        group_id: GroupId,
        id: EndpointId,
        status: EndpointStatus,
    ) -> Result<Endpoint, WebhookError> {
        self.get_endpoint(group_id, id).await?;
        self.stores
            .endpoints
            .update_endpoint_status(id, status)
            .await
            .or_not_found(WebhookError::EndpointNotFound)
    }

    pub async fn get_endpoint(
        &self,
        group_id: GroupId,
        id: EndpointId,
    ) -> Result<Endpoint, WebhookError> {
        let endpoint = self
            .stores
            .endpoints
            .find_endpoint_by_id(id)
            .await
            .or_not_found(WebhookError::EndpointNotFound)?;
        ensure_group(endpoint, group_id, WebhookError::EndpointNotFound)
    }

    pub async fn create_subscription(
        &self,
        group_id: GroupId,
        request: CreateSubscription,
    ) -> Result<Subscription, WebhookError> {
        if request.name.trim().is_empty() {
            return Err(WebhookError::Validation(
                "Subscription name is required".to_string(),
            ));
        }
        let endpoint = self.get_endpoint(group_id, request.endpoint_id).await?;

        let mut subscription = Subscription::new(&endpoint, request.name.trim());
        if let Some(filter) = request.filter_config {
            filter.validate()?;
            subscription = subscription.with_filter(filter);
        }
        if let Some(retry) = request.retry_config {
            validate_retry(&retry)?;
            subscription = subscription.with_retry(retry);
        }
        if let Some(alert) = request.alert_config {
            subscription = subscription.with_alert(alert);
        }
        if let Some(source_id) = request.source_id {
            subscription = subscription.with_source(source_id);
        }

        self.stores
            .subscriptions
            .create_subscription(&subscription)
            .await?;

        tracing::info!(
            target: "webhook_subscription",
            subscription_id = %subscription.id,
            endpoint_id = %subscription.endpoint_id,
            group_id = %group_id,
            "Subscription created"
        );
        Ok(subscription)
    }

    pub async fn get_subscription(
        &self,
        group_id: GroupId,
        id: SubscriptionId,
    ) -> Result<Subscription, WebhookError> {
        let subscription = self
            .stores
            .subscriptions
            .find_subscription_by_id(id)
            .await
            .or_not_found(WebhookError::SubscriptionNotFound)?;
        ensure_group(subscription, group_id, WebhookError::SubscriptionNotFound)
    }

    pub async fn list_subscriptions(
        &self,
        group_id: GroupId,
        app_id: ApplicationId,
    ) -> Result<Vec<Subscription>, WebhookError> {
        Ok(self
            .stores
            .subscriptions
            .list_subscriptions_by_app(group_id, app_id)
            .await?)
    }

    /// Edit name, filter, retry or alert policy.
    ///
    /// A new retry policy applies from the next failed attempt of each pending
    /// delivery; trial counts already recorded are kept.
    pub async fn update_subscription(
        &self,
        group_id: GroupId,
        id: SubscriptionId,
        request: UpdateSubscription,
    ) -> Result<Subscription, WebhookError> {
        let mut subscription = self.get_subscription(group_id, id).await?;

        if let Some(name) = request.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(WebhookError::Validation(
                    "Subscription name is required".to_string(),
                ));
            }
            subscription.name = name.to_string();
        }
        if let Some(filter) = request.filter_config {
            filter.validate()?;
            subscription.filter_config = filter;
        }
        if let Some(retry) = request.retry_config {
            validate_retry(&retry)?;
            subscription.retry_config = retry;
        }
        if let Some(alert) = request.alert_config {
            subscription.alert_config = alert;
        }

        let updated = self
            .stores
            .subscriptions
            .update_subscription(&subscription)
            .await
            .or_not_found(WebhookError::SubscriptionNotFound)?;

        tracing::info!(
            target: "webhook_subscription",
            subscription_id = %id,
            group_id = %group_id,
            "Subscription updated"
        );
        Ok(updated)
    }

    /// Soft delete a subscription.
    ///
    /// Its pending deliveries are no longer claimed and it stops matching new
    /// events. Delivery history stays readable.
    pub async fn delete_subscription(
        &self,
        group_id: GroupId,
        id: SubscriptionId,
    ) -> Result<(), WebhookError> {
        self.get_subscription(group_id, id).await?;
        self.stores
            .subscriptions
            .delete_subscription(id)
            .await
            .or_not_found(WebhookError::SubscriptionNotFound)?;

        tracing::info!(
            target: "webhook_subscription",
            subscription_id = %id,
            group_id = %group_id,
            "Subscription deleted"
        );
        Ok(())
    }

    /// Flip a subscription between active and inactive.
    ///
    /// Deactivation stops future claims; attempts already in flight finish.
    pub async fn toggle_status(
        &self,
        group_id: GroupId,
        id: SubscriptionId,
    ) -> Result<Subscription, WebhookError> {
        let current = self.get_subscription(group_id, id).await?;
        let next: SubscriptionStatus = current.status.toggled();
        let updated = self
            .stores
            .subscriptions
            .update_subscription_status(id, next)
            .await
            .or_not_found(WebhookError::SubscriptionNotFound)?;

        tracing::info!(
            target: "webhook_subscription",
            subscription_id = %id,
            status = ?updated.status,
            "Subscription status toggled"
        );
        Ok(updated)
    }
}
