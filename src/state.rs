use std::sync::Arc;

use sqlx::MySqlPool;

use crate::config::AppConfig;
use crate::services::delivery_service::DeliveryService;
use crate::services::mpesa_service::MpesaService;
use crate::services::payment_service::PaymentService;

#[derive(Clone)]
pub struct AppState {
    pub pool: MySqlPool,
    pub config: AppConfig,
    pub mpesa: Arc<MpesaService>,
    pub payments: Arc<PaymentService>,
    pub delivery: Arc<DeliveryService>,
}

impl AppState {
    pub fn new(pool: MySqlPool, config: AppConfig) -> Self {
        let mpesa = Arc::new(MpesaService::new(config.clone()));
        let payments = Arc::new(PaymentService::new(pool.clone(), mpesa.clone()));
        let delivery = Arc::new(DeliveryService::new(pool.clone()));

        AppState {
            pool,
            config,
            mpesa,
            payments,
            delivery,
        }
    }
}
