pub mod audit;
pub mod delivery_service;
pub mod mpesa_service;
pub mod payment_service;
