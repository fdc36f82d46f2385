use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Too many active scenarios (max {max}).")]
    TooManyScenarios { max: usize },
    #[error("Scenario has too many journeys (max {max}).")]
    TooManyJourneys { max: usize },
    #[error("Unknown scenario {spec:?}; registered: {known:?}.")]
    UnknownScenario { spec: String, known: Vec<String> },
}
