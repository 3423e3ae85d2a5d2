use std::pin::Pin;

use serde_json::Value;

use super::{Arguments, Error, Tool, ToolResult};

pub(crate) trait ToolObject: Send + Sync + 'static {
    fn execute(
        &self,
        arguments: Arguments,
    ) -> Pin<Box<dyn Future<Output = ToolResult> + Send>>;
}

pub(crate) struct AnyTool<T: Tool>(pub T);

impl<T: Tool> ToolObject for AnyTool<T> {
    #[inline]
    fn execute(
        &self,
        arguments: Arguments,
    ) -> Pin<Box<dyn Future<Output = ToolResult> + Send>> {
        let input: T::Input =
            match serde_json::from_value(Value::Object(arguments)) {
                Ok(input) => input,
                Err(err) => {
                    let reason = format!("{err}");
                    return Box::pin(std::future::ready(ToolResult::Err(
                        Error::invalid_input().with_reason(reason),
                    )));
                }
            };
        Box::pin(self.0.execute(input))
    }
}

pub(crate) struct FnTool<F>(pub F);

impl<F, Fut> ToolObject for FnTool<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolResult> + Send + 'static,
{
    #[inline]
    fn execute(
        &self,
        arguments: Arguments,
    ) -> Pin<Box<dyn Future<Output = ToolResult> + Send>> {
        Box::pin((self.0)(arguments))
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;
    use std::sync::LazyLock;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::tool::{ErrorKind, Schema, ToolExample, ToolSpec};

    static SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
        Schema::object().property("location", Schema::string())
    });

    #[derive(Deserialize)]
    struct WeatherInput {
        location: String,
    }

    struct WeatherTool;

    impl Tool for WeatherTool {
        type Input = WeatherInput;

        fn name(&self) -> &str {
            "getWeather"
        }

        fn description(&self) -> &str {
            "\nGet the weather in a location\n"
        }

        fn parameters(&self) -> &Schema {
            &SCHEMA
        }

        fn examples(&self) -> &[ToolExample] {
            &[]
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Ok(format!("Sunny in {}", input.location)))
        }
    }

    #[tokio::test]
    async fn test_typed_tool() {
        let spec = ToolSpec::from_tool(WeatherTool);
        assert_eq!(spec.description(), "Get the weather in a location");

        let args = json!({ "location": "Bern" }).as_object().cloned().unwrap();
        assert_eq!(spec.execute(args).await.unwrap(), "Sunny in Bern");

        let args = json!({ "city": "Bern" }).as_object().cloned().unwrap();
        let err = spec.execute(args).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_closure_tool() {
        let spec = ToolSpec::new("Echo").with_handler(|args: Arguments| async move {
            Ok(format!("{}", Value::Object(args)))
        });
        let args = json!({ "a": 1 }).as_object().cloned().unwrap();
        assert_eq!(spec.execute(args).await.unwrap(), r#"{"a":1}"#);

        let err = ToolSpec::new("No handler")
            .execute(Arguments::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionError);
    }
}
