use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{InterpretRequest, Interpreter};
use crate::error::AdapterError;

const MAIN_COVERAGES: [&str; 4] = ["门诊医疗", "住院医疗", "重疾保障", "意外伤害"];

/// Stand-in used when no workflow endpoint is configured. Waits a fixed delay
/// and returns a plausible interpretation derived from the request.
#[derive(Debug, Clone)]
pub struct SimulatedInterpreter {
    delay: Duration,
}

impl SimulatedInterpreter {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Interpreter for SimulatedInterpreter {
    async fn interpret(&self, request: &InterpretRequest) -> Result<serde_json::Value, AdapterError> {
        tokio::time::sleep(self.delay).await;

        // Stable per task so repeated reads of a result never disagree.
        let seed = request
            .task_id
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
        let main_coverage = MAIN_COVERAGES[(seed % 4) as usize];
        let deductible = [0, 100, 500, 1000][(seed / 4 % 4) as usize];
        let reimbursement_ratio = [80, 90, 100][(seed % 3) as usize];

        Ok(json!({
            "task_id": request.task_id,
            "task_name": request.task_name,
            "company": request.company,
            "scene": request.scene,
            "interpretation_result": {
                "policy_info": {
                    "policy_number": format!("POL-{}", request.task_id),
                    "policy_type": request.scene,
                    "effective_date": "2025-01-01",
                    "expiry_date": "2026-01-01",
                    "insured_count": 50 + seed % 451,
                    "premium_amount": format!("¥{}", 100_000 + (seed % 400_001)),
                },
                "coverage_details": {
                    "main_coverage": main_coverage,
                    "additional_coverage": ["就医绿通", "第二诊疗意见", "健康管理服务"],
                    "deductible": format!("¥{deductible}"),
                    "reimbursement_ratio": format!("{reimbursement_ratio}%"),
                },
                "special_terms": ["等待期：30天", "医院范围：二级及以上公立医院", "理赔方式：先垫付后报销"],
                "exclusions": ["既往症不保", "美容整形相关费用", "非治疗性体检费用"],
            },
            "documents": {
                "contract": request.handles.primary.original_name,
                "quotes": request.handles.supplementary.len(),
            },
            "recommendations": ["建议补充补充医疗保险", "可考虑增加重疾保额", "建议定期更新员工名单"],
        }))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
