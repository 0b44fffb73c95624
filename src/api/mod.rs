pub mod scenario_dto;
pub mod settings_dto;
