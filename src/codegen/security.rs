use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::codegen::emitter::CodeBuffer;
use crate::codegen::error::{LowerError, Result};
use crate::codegen::indicators::IndicatorRegistry;
use crate::codegen::limits::{CodeGenerationLimits, SecurityCallValidator};
use crate::codegen::lower::{go_quote, serialize_ast, ExprLowerer};
use crate::security::{SecurityCall, SecurityKey, SymbolRef};

pub const DATAFETCHER_IMPORT: &str = "github.com/quant5-lab/runner/datafetcher";
pub const SECURITY_IMPORT: &str = "github.com/quant5-lab/runner/security";
pub const AST_IMPORT: &str = "github.com/quant5-lab/runner/ast";

/// Prefetch block for one deduplicated key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchPlan {
    pub key: SecurityKey,
    /// `<stem>_limit`, `<stem>_data`, `<stem>_err`, `<stem>_ctx`
    pub var_stem: String,
    pub warmup: usize,
    pub expressions: usize,
}

impl PrefetchPlan {
    pub fn context_var(&self) -> String {
        format!("{}_ctx", self.var_stem)
    }
}

/// Output of the injector: code to run before the bar loop and the locals it defines.
#[derive(Debug, Clone, Default)]
pub struct SecurityInjection {
    pub prefetch_code: String,
    pub import_paths: BTreeSet<String>,
    pub plans: BTreeMap<SecurityKey, PrefetchPlan>,
}

impl SecurityInjection {
    pub fn is_empty(&self) -> bool {
        self.prefetch_code.is_empty()
    }

    pub fn plan_for(&self, key: &SecurityKey) -> Option<&PrefetchPlan> {
        self.plans.get(key)
    }
}

pub struct SecurityInjector {
    limits: CodeGenerationLimits,
    min_warmup: usize,
}

impl SecurityInjector {
    pub fn new(limits: CodeGenerationLimits, min_warmup: usize) -> Self {
        Self { limits, min_warmup }
    }

    /// Groups calls by key. Keys are ordered, so the emitted blocks are stable.
    pub fn plan(&self, calls: &[SecurityCall]) -> BTreeMap<SecurityKey, PrefetchPlan> {
        let mut grouped: BTreeMap<SecurityKey, Vec<&SecurityCall>> = BTreeMap::new();
        for call in calls {
            grouped.entry(call.key()).or_default().push(call);
        }

        let mut stems = BTreeSet::new();
        grouped
            .into_iter()
            .map(|(key, calls)| {
                let max_period = calls.iter().map(|c| c.max_period()).max().unwrap_or(0);
                let mut var_stem = key.var_stem();
                // sanitizing may map distinct keys onto one name ("1M" and "1m")
                let mut suffix = 1;
                while !stems.insert(var_stem.clone()) {
                    suffix += 1;
                    var_stem = format!("{}_{suffix}", key.var_stem());
                }
                let plan = PrefetchPlan {
                    key: key.clone(),
                    var_stem,
                    warmup: max_period.max(self.min_warmup),
                    expressions: calls.len(),
                };
                (key, plan)
            })
            .collect()
    }

    pub fn generate_prefetch(&self, calls: &[SecurityCall]) -> Result<SecurityInjection> {
        SecurityCallValidator::new(self.limits).validate_call_count(calls.len())?;
        if calls.is_empty() {
            return Ok(SecurityInjection::default());
        }

        let plans = self.plan(calls);
        let mut out = CodeBuffer::with_depth(1);
        out.line("/* === security() prefetch === */");
        out.line("fetcher := datafetcher.NewFileFetcher(dataDir, 0)");
        out.line("secBarEvaluator := security.NewStreamingBarEvaluator()");
        out.line("_ = secBarEvaluator");
        out.line("baseTimeframeSeconds := context.TimeframeToSeconds(ctx.Timeframe)");
        out.line("var secTimeframeSeconds int64");

        for plan in plans.values() {
            info!(
                key = %plan.key,
                warmup = plan.warmup,
                expressions = plan.expressions,
                "planning security prefetch"
            );
            out.blank();
            emit_prefetch_block(plan, &mut out);
        }
        out.blank();
        out.line("/* === end prefetch === */");
        out.blank();

        let import_paths = [DATAFETCHER_IMPORT, SECURITY_IMPORT]
            .into_iter()
            .map(str::to_string)
            .collect();

        Ok(SecurityInjection {
            prefetch_code: out.into_string(),
            import_paths,
            plans,
        })
    }
}

fn symbol_expr(key: &SecurityKey) -> String {
    match &key.symbol {
        SymbolRef::Runtime => "ctx.Symbol".to_string(),
        SymbolRef::Literal(symbol) => go_quote(symbol),
    }
}

fn timeframe_expr(key: &SecurityKey) -> String {
    if key.timeframe.is_empty() {
        "ctx.Timeframe".to_string()
    } else {
        go_quote(&key.timeframe)
    }
}

/// Go expression evaluating to the `securityContexts` key.
pub fn key_expr(key: &SecurityKey) -> String {
    if !key.is_runtime_bound() {
        return go_quote(&key.template());
    }
    let mut format = String::new();
    let mut args = Vec::new();
    match &key.symbol {
        SymbolRef::Runtime => {
            format.push_str("%s");
            args.push("ctx.Symbol");
        }
        SymbolRef::Literal(symbol) => format.push_str(&symbol.replace('%', "%%")),
    }
    format.push(':');
    if key.timeframe.is_empty() {
        format.push_str("%s");
        args.push("ctx.Timeframe");
    } else {
        format.push_str(&key.timeframe.replace('%', "%%"));
    }
    format!("fmt.Sprintf({}, {})", go_quote(&format), args.join(", "))
}

fn emit_prefetch_block(plan: &PrefetchPlan, out: &mut CodeBuffer) {
    let v = &plan.var_stem;
    let symbol = symbol_expr(&plan.key);
    let timeframe = timeframe_expr(&plan.key);

    out.line(&format!("/* {} */", plan.key));
    out.line(&format!(
        "secTimeframeSeconds = context.TimeframeToSeconds({timeframe})"
    ));
    out.open("if secTimeframeSeconds == 0 {");
    out.line("secTimeframeSeconds = baseTimeframeSeconds");
    out.close("}");
    out.line(&format!("{v}_limit := len(ctx.Data)"));
    out.open("if baseTimeframeSeconds > 0 && secTimeframeSeconds > baseTimeframeSeconds {");
    out.line("timeframeRatio := float64(baseTimeframeSeconds) / float64(secTimeframeSeconds)");
    out.line(&format!(
        "{v}_limit = int(math.Ceil(float64(len(ctx.Data))*timeframeRatio)) + {}",
        plan.warmup
    ));
    out.close("}");
    out.line(&format!(
        "{v}_data, {v}_err := fetcher.Fetch({symbol}, {timeframe}, {v}_limit)"
    ));
    out.open(&format!("if {v}_err != nil {{"));
    out.line(&format!(
        "fmt.Fprintf(os.Stderr, \"Failed to fetch %s: %v\\n\", {}, {v}_err)",
        key_expr(&plan.key)
    ));
    out.line("os.Exit(1)");
    out.close("}");
    out.line(&format!(
        "{v}_ctx := context.New({symbol}, {timeframe}, len({v}_data))"
    ));
    out.open(&format!("for _, bar := range {v}_data {{"));
    out.line(&format!("{v}_ctx.AddBar(bar)"));
    out.close("}");
    out.line(&format!(
        "securityContexts[{}] = {v}_ctx",
        key_expr(&plan.key)
    ));
}

/// Per-bar lookup binding `target` to the call's value on the prefetched context.
///
/// The expression is re-evaluated by the runtime evaluator, except when it is a single TA call
/// the evaluator lacks: that call is inlined in a block where `ctx` points at a copy of the
/// security context positioned at the matched bar. Returns the state lines to hoist before the bar loop.
pub fn emit_security_lookup(
    call: &SecurityCall,
    plan: &PrefetchPlan,
    target: &str,
    scope: &str,
    out: &mut CodeBuffer,
) -> std::result::Result<Vec<String>, LowerError> {
    let sec_ctx = plan.context_var();
    let finder = if call.lookahead {
        "context.FindBarIndexByTimestampWithLookahead"
    } else {
        "context.FindBarIndexByTimestamp"
    };
    let registry = IndicatorRegistry::new();
    let inline = call
        .expression
        .callee_name()
        .filter(|name| name.starts_with("ta.") && registry.requires_inline(name))
        .is_some();

    out.open(&format!(
        "if secBarIdx := {finder}({sec_ctx}, ctx.Data[ctx.BarIndex].Time); secBarIdx >= 0 {{"
    ));
    let mut hoisted = Vec::new();
    if inline {
        debug!(name = %call.name, key = %plan.key, "inlining security expression");
        let lowered = ExprLowerer::source(scope).lower(&call.expression)?;
        // positioned copy; the prefetched context stays untouched
        out.line(&format!("secCtx := *{sec_ctx}"));
        out.line("secCtx.BarIndex = secBarIdx");
        out.line("ctx := &secCtx");
        out.lines(&lowered.setup);
        out.line(&format!("{target} = {}", lowered.value));
        hoisted = lowered.hoisted;
    } else {
        let literal = serialize_ast(&call.expression)?;
        out.line(&format!(
            "{target} = secBarEvaluator.EvaluateAtBar({literal}, secBarIdx, {sec_ctx})"
        ));
    }
    out.close("}");
    Ok(hoisted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::ast::Expr;
    use crate::codegen::error::CodegenError;

    fn call(symbol: SymbolRef, timeframe: &str, expression: Expr) -> SecurityCall {
        SecurityCall {
            symbol,
            timeframe: timeframe.to_string(),
            expression,
            name: "x".to_string(),
            lookahead: false,
            position: 0,
        }
    }

    fn btc(timeframe: &str, expression: Expr) -> SecurityCall {
        call(SymbolRef::Literal("BTCUSDT".to_string()), timeframe, expression)
    }

    #[test]
    fn test_no_calls_no_prefetch() {
        let injector = SecurityInjector::new(CodeGenerationLimits::default(), 50);
        let injection = injector.generate_prefetch(&[]).unwrap();
        assert!(injection.is_empty());
        assert!(injection.import_paths.is_empty());
    }

    #[test]
    fn test_deduplicates_by_key() {
        let injector = SecurityInjector::new(CodeGenerationLimits::default(), 50);
        let calls = vec![
            btc("1D", ident("close")),
            btc("1D", ta("sma", vec![ident("close"), int(200)])),
            btc("1W", ident("high")),
        ];
        let injection = injector.generate_prefetch(&calls).unwrap();
        let code = &injection.prefetch_code;

        assert_eq!(code.matches("fetcher.Fetch(").count(), 2);
        assert_eq!(code.matches("securityContexts[").count(), 2);
        assert_eq!(code.matches("fetcher := datafetcher.NewFileFetcher(dataDir, 0)").count(), 1);
        assert!(code.contains("securityContexts[\"BTCUSDT:1D\"] = sec_btcusdt_1d_ctx"));
        assert!(code.contains("sec_btcusdt_1d_limit = int(math.Ceil(float64(len(ctx.Data))*timeframeRatio)) + 200"));
        assert!(code.contains("sec_btcusdt_1w_limit = int(math.Ceil(float64(len(ctx.Data))*timeframeRatio)) + 50"));

        let daily = &injection.plans[&calls[0].key()];
        assert_eq!(daily.expressions, 2);
        assert_eq!(daily.warmup, 200);
        assert!(injection.import_paths.contains(DATAFETCHER_IMPORT));
        assert!(injection.import_paths.contains(SECURITY_IMPORT));
    }

    #[test]
    fn test_runtime_symbol_key() {
        let injector = SecurityInjector::new(CodeGenerationLimits::default(), 50);
        let calls = vec![
            call(SymbolRef::Runtime, "1D", ident("close")),
            call(SymbolRef::Runtime, "", ident("open")),
        ];
        let code = injector.generate_prefetch(&calls).unwrap().prefetch_code;

        assert!(code.contains("securityContexts[fmt.Sprintf(\"%s:1D\", ctx.Symbol)] = sec_cur_1d_ctx"));
        assert!(code.contains("sec_cur_1d_data, sec_cur_1d_err := fetcher.Fetch(ctx.Symbol, \"1D\", sec_cur_1d_limit)"));
        assert!(code.contains("fetcher.Fetch(ctx.Symbol, ctx.Timeframe, sec_cur_base_limit)"));
        assert!(code.contains("securityContexts[fmt.Sprintf(\"%s:%s\", ctx.Symbol, ctx.Timeframe)] = sec_cur_base_ctx"));
    }

    #[test]
    fn test_colliding_stems_get_suffix() {
        let injector = SecurityInjector::new(CodeGenerationLimits::default(), 50);
        let plans = injector.plan(&[btc("1M", ident("close")), btc("1m", ident("close"))]);
        let stems: BTreeSet<_> = plans.values().map(|p| p.var_stem.clone()).collect();
        assert_eq!(stems.len(), 2);
        assert!(stems.contains("sec_btcusdt_1m"));
        assert!(stems.contains("sec_btcusdt_1m_2"));
    }

    #[test]
    fn test_call_limit_is_enforced() {
        let injector = SecurityInjector::new(
            CodeGenerationLimits {
                max_statements_per_pass: 10_000,
                max_security_calls: 2,
            },
            50,
        );
        let calls = vec![btc("1D", ident("close")); 3];
        let err = injector.generate_prefetch(&calls).unwrap_err();
        assert!(matches!(err, CodegenError::SecurityCallLimit { limit: 2 }));
    }

    #[test]
    fn test_lookup_uses_bar_evaluator() {
        let injector = SecurityInjector::new(CodeGenerationLimits::default(), 50);
        let c = btc("1D", binary("+", ident("close"), ident("open")));
        let plans = injector.plan(std::slice::from_ref(&c));
        let mut out = CodeBuffer::new();
        let hoisted = emit_security_lookup(&c, &plans[&c.key()], "daily", "s1", &mut out).unwrap();

        let code = out.into_string();
        assert!(hoisted.is_empty());
        assert!(code.contains(
            "if secBarIdx := context.FindBarIndexByTimestamp(sec_btcusdt_1d_ctx, ctx.Data[ctx.BarIndex].Time); secBarIdx >= 0 {"
        ));
        assert!(code.contains("daily = secBarEvaluator.EvaluateAtBar(&ast.BinaryExpression{Operator: \"+\""));
        assert!(code.contains(", secBarIdx, sec_btcusdt_1d_ctx)"));
    }

    #[test]
    fn test_lookup_inlines_atr_on_security_context() {
        let injector = SecurityInjector::new(CodeGenerationLimits::default(), 50);
        let mut c = btc("1D", ta("atr", vec![int(14)]));
        c.lookahead = true;
        let plans = injector.plan(std::slice::from_ref(&c));
        let mut out = CodeBuffer::new();
        let hoisted = emit_security_lookup(&c, &plans[&c.key()], "dailyAtr", "s2", &mut out).unwrap();

        let code = out.into_string();
        assert!(code.contains("context.FindBarIndexByTimestampWithLookahead(sec_btcusdt_1d_ctx"));
        assert!(code.contains(
            "\tsecCtx := *sec_btcusdt_1d_ctx\n\tsecCtx.BarIndex = secBarIdx\n\tctx := &secCtx\n"
        ));
        assert!(!code.contains("sec_btcusdt_1d_ctx.BarIndex"));
        assert!(code.contains("alpha := 1.0 / 14"));
        assert!(code.contains("dailyAtr = s2_atr0"));
        assert!(!code.contains("EvaluateAtBar"));
        assert!(!code.contains("origCtx"));
        assert_eq!(hoisted, vec!["s2_atr0_prev := math.NaN()", "s2_atr0_bar := -1"]);
    }

    #[test]
    fn test_key_expr_escapes_percent() {
        let key = SecurityKey {
            symbol: SymbolRef::Literal("A%B".to_string()),
            timeframe: String::new(),
        };
        assert_eq!(key_expr(&key), "fmt.Sprintf(\"A%%B:%s\", ctx.Timeframe)");
    }
}
