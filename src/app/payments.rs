//! Purchase flow
//!
//! Pre-checkout approval and successful-payment crediting. The credit goes
//! through the same conditional balance update as billing.

use super::Service;
use crate::app::update::{PreCheckoutQuery, SuccessfulPayment};
use crate::domain::models::PaymentLog;
use crate::domain::packages;
use crate::error::Result;
use crate::ports::chat::ParseMode;

/// Answer a pre-checkout query; unknown payloads are rejected
pub async fn handle_pre_checkout(service: &Service, query: &PreCheckoutQuery) -> Result<&'static str> {
    let known = packages::by_payload(&query.invoice_payload).is_some();
    service.chat.answer_pre_checkout(&query.id, known).await?;
    Ok(if known { "pre_checkout_ok" } else { "pre_checkout_rejected" })
}

/// Credit a successful payment and append the payment log row
pub async fn handle_successful_payment(
    service: &Service,
    user_id: i64,
    chat_id: i64,
    payment: &SuccessfulPayment,
) -> Result<&'static str> {
    let Some(package) = packages::by_payload(&payment.invoice_payload) else {
        log::error!("Payment with unknown payload {} from user {user_id}", payment.invoice_payload);
        return Ok("payment_unknown_payload");
    };

    let new_balance = service
        .storage
        .update_user_balance(user_id, package.minutes)
        .await?;

    service
        .storage
        .log_payment(&PaymentLog {
            user_id,
            payload: package.payload.to_string(),
            stars_amount: payment.total_amount,
            minutes: package.minutes,
            created_at: chrono::Utc::now().timestamp(),
        })
        .await?;

    log::info!(
        "User {user_id} bought {} ({} min), balance now {new_balance}",
        package.id,
        package.minutes
    );
    service
        .chat
        .send_message(
            chat_id,
            &format!(
                "✅ Оплата получена!\nНачислено: {} мин.\nВаш баланс: {new_balance} мин.",
                package.minutes
            ),
            ParseMode::Plain,
        )
        .await?;

    Ok("payment_credited")
}

/// Send the package list as an invoice keyboard
pub async fn send_package_menu(service: &Service, chat_id: i64) -> Result<()> {
    let keyboard: Vec<Vec<(String, String)>> = packages::PACKAGES
        .iter()
        .map(|p| {
            vec![(
                format!("{} — {}⭐", p.title, p.stars_amount),
                format!("buy_{}", p.id),
            )]
        })
        .collect();
    service
        .chat
        .send_message_with_keyboard(
            chat_id,
            "Выберите пакет минут:",
            ParseMode::Plain,
            &keyboard,
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testkit::TestHarnessBuilder;
    use crate::ports::mocks::ChatEvent;

    #[tokio::test]
    async fn test_payment_credits_balance_and_logs() {
        let builder = TestHarnessBuilder::new();
        let storage = builder.storage.clone().with_user(12345, 3);
        let harness = TestHarnessBuilder { storage, ..builder }.build();

        let payment = SuccessfulPayment {
            invoice_payload: "buy_start_50".to_string(),
            total_amount: 35,
        };
        let outcome = handle_successful_payment(&harness.service, 12345, 67890, &payment)
            .await
            .unwrap();
        assert_eq!(outcome, "payment_credited");

        let user = harness.storage.users.lock().unwrap()[&12345].clone();
        assert_eq!(user.balance_minutes, 53);

        let logs = harness.storage.payment_logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].minutes, 50);
    }

    #[tokio::test]
    async fn test_unknown_payload_not_credited() {
        let builder = TestHarnessBuilder::new();
        let storage = builder.storage.clone().with_user(1, 0);
        let harness = TestHarnessBuilder { storage, ..builder }.build();

        let payment = SuccessfulPayment {
            invoice_payload: "buy_bogus".to_string(),
            total_amount: 1,
        };
        let outcome = handle_successful_payment(&harness.service, 1, 1, &payment)
            .await
            .unwrap();
        assert_eq!(outcome, "payment_unknown_payload");
        assert!(harness.storage.payment_logs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pre_checkout_validation() {
        let harness = TestHarnessBuilder::new().build();
        let query = PreCheckoutQuery {
            id: "q1".to_string(),
            from: Default::default(),
            invoice_payload: "buy_micro_10".to_string(),
            total_amount: 5,
        };
        assert_eq!(
            handle_pre_checkout(&harness.service, &query).await.unwrap(),
            "pre_checkout_ok"
        );

        let bad = PreCheckoutQuery {
            id: "q2".to_string(),
            from: Default::default(),
            invoice_payload: "buy_nothing".to_string(),
            total_amount: 5,
        };
        assert_eq!(
            handle_pre_checkout(&harness.service, &bad).await.unwrap(),
            "pre_checkout_rejected"
        );

        let events = harness.chat.events();
        assert!(events.contains(&ChatEvent::PreCheckout {
            query_id: "q1".to_string(),
            ok: true
        }));
        assert!(events.contains(&ChatEvent::PreCheckout {
            query_id: "q2".to_string(),
            ok: false
        }));
    }
}
