use crate::error::{EngineError, Result};
use crate::protocol::param_value::{ParamValue, TAG_NULL};
use odbc_api::parameter::InputParameter;
use odbc_api::IntoParameter;

/// Maps tagged wire parameters onto driver input parameters in positional
/// order. Each boxed parameter owns its payload, so the bound storage
/// outlives the execute call regardless of what the caller does with the
/// original buffer.
///
/// Tag mapping: 0 NULL, 1 VARCHAR, 2 INTEGER, 3 BIGINT, 4 DECIMAL (bound as
/// text, which every driver converts), 5 VARBINARY.
pub fn to_driver_params(params: &[ParamValue]) -> Vec<Box<dyn InputParameter>> {
    params
        .iter()
        .map(|p| -> Box<dyn InputParameter> {
            match p {
                ParamValue::Null => Box::new(Option::<String>::None.into_parameter()),
                ParamValue::String(s) => Box::new(s.clone().into_parameter()),
                ParamValue::Integer(n) => Box::new(*n),
                ParamValue::BigInt(n) => Box::new(*n),
                ParamValue::Decimal(s) => Box::new(s.clone().into_parameter()),
                ParamValue::Binary(b) => Box::new(b.clone().into_parameter()),
            }
        })
        .collect()
}

/// Validates a parameter list against a prepared statement's learned
/// schema. NULL is compatible with any declared tag in either direction.
pub fn check_schema(schema: &[u8], params: &[ParamValue]) -> Result<()> {
    if schema.len() != params.len() {
        return Err(EngineError::Validation(format!(
            "parameter count mismatch: statement takes {}, got {}",
            schema.len(),
            params.len()
        )));
    }
    for (position, (declared, param)) in schema.iter().zip(params).enumerate() {
        let actual = param.tag();
        if *declared != actual && *declared != TAG_NULL && actual != TAG_NULL {
            return Err(EngineError::Validation(format!(
                "parameter type mismatch at position {}: declared tag {}, got {}",
                position + 1,
                declared,
                actual
            )));
        }
    }
    Ok(())
}
