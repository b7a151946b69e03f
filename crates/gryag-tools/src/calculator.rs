//! Arithmetic tool: a small shunting-yard evaluator, no `eval`, no shell.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{Tool, ToolResult};

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Обчислює арифметичний вираз: + - * / % ^ і дужки"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {"type": "string", "description": "вираз, напр. (2+3)*4"}
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(expr) = args.get("expression").and_then(Value::as_str) else {
            return ToolResult::error("expression required");
        };
        match evaluate(expr) {
            Ok(result) => ToolResult::success(json!({"expression": expr, "result": result})),
            Err(e) => ToolResult::error(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Op(char),
    LeftParen,
    RightParen,
}

pub fn evaluate(expr: &str) -> Result<f64, String> {
    let tokens = tokenize(expr)?;
    let rpn = to_rpn(&tokens)?;
    eval_rpn(&rpn)
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num: String = chars[start..i].iter().collect();
                tokens.push(Token::Number(
                    num.parse().map_err(|_| format!("bad number: {num}"))?,
                ));
            }
            '+' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '-' => {
                // Unary minus at expression or group start.
                let unary = matches!(
                    tokens.last(),
                    None | Some(Token::Op(_)) | Some(Token::LeftParen)
                );
                if unary {
                    tokens.push(Token::Number(-1.0));
                    tokens.push(Token::Op('*'));
                } else {
                    tokens.push(Token::Op('-'));
                }
                i += 1;
            }
            '(' => {
                tokens.push(Token::LeftParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RightParen);
                i += 1;
            }
            other => return Err(format!("unexpected character: {other}")),
        }
    }
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    Ok(tokens)
}

fn precedence(op: char) -> u8 {
    match op {
        '+' | '-' => 1,
        '*' | '/' | '%' => 2,
        '^' => 3,
        _ => 0,
    }
}

fn to_rpn(tokens: &[Token]) -> Result<Vec<Token>, String> {
    let mut output = Vec::new();
    let mut stack: Vec<Token> = Vec::new();
    for &token in tokens {
        match token {
            Token::Number(_) => output.push(token),
            Token::Op(op) => {
                while let Some(&Token::Op(top)) = stack.last() {
                    // ^ is right-associative.
                    let pop = precedence(top) > precedence(op)
                        || (precedence(top) == precedence(op) && op != '^');
                    if !pop {
                        break;
                    }
                    output.push(stack.pop().unwrap());
                }
                stack.push(token);
            }
            Token::LeftParen => stack.push(token),
            Token::RightParen => {
                loop {
                    match stack.pop() {
                        Some(Token::LeftParen) => break,
                        Some(t) => output.push(t),
                        None => return Err("unbalanced parentheses".to_string()),
                    }
                }
            }
        }
    }
    while let Some(t) = stack.pop() {
        if t == Token::LeftParen {
            return Err("unbalanced parentheses".to_string());
        }
        output.push(t);
    }
    Ok(output)
}

fn eval_rpn(rpn: &[Token]) -> Result<f64, String> {
    let mut stack: Vec<f64> = Vec::new();
    for &token in rpn {
        match token {
            Token::Number(n) => stack.push(n),
            Token::Op(op) => {
                let b = stack.pop().ok_or("malformed expression")?;
                let a = stack.pop().ok_or("malformed expression")?;
                let result = match op {
                    '+' => a + b,
                    '-' => a - b,
                    '*' => a * b,
                    '/' => {
                        if b == 0.0 {
                            return Err("division by zero".to_string());
                        }
                        a / b
                    }
                    '%' => {
                        if b == 0.0 {
                            return Err("division by zero".to_string());
                        }
                        a % b
                    }
                    '^' => a.powf(b),
                    _ => return Err(format!("unknown operator: {op}")),
                };
                if !result.is_finite() {
                    return Err("result is not finite".to_string());
                }
                stack.push(result);
            }
            _ => return Err("malformed expression".to_string()),
        }
    }
    if stack.len() == 1 {
        Ok(stack[0])
    } else {
        Err("malformed expression".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_arithmetic() {
        assert_eq!(evaluate("2+2").unwrap(), 4.0);
        assert_eq!(evaluate("(2+3)*4").unwrap(), 20.0);
        assert_eq!(evaluate("10 / 4").unwrap(), 2.5);
        assert_eq!(evaluate("7 % 3").unwrap(), 1.0);
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(evaluate("2+3*4").unwrap(), 14.0);
        assert_eq!(evaluate("2^3^2").unwrap(), 512.0);
    }

    #[test]
    fn unary_minus() {
        assert_eq!(evaluate("-3+5").unwrap(), 2.0);
        assert_eq!(evaluate("2*(-3)").unwrap(), -6.0);
    }

    #[test]
    fn error_cases() {
        assert!(evaluate("1/0").is_err());
        assert!(evaluate("(1+2").is_err());
        assert!(evaluate("").is_err());
        assert!(evaluate("2+abc").is_err());
    }

    #[tokio::test]
    async fn tool_round_trip() {
        let out = CalculatorTool
            .execute(serde_json::json!({"expression": "6*7"}))
            .await;
        assert!(!out.is_error);
        assert_eq!(out.value["result"], 42.0);
    }

    #[tokio::test]
    async fn missing_argument_is_an_error() {
        let out = CalculatorTool.execute(serde_json::json!({})).await;
        assert!(out.is_error);
    }
}
