//! The backend request surface. Every outbound request is built from one of
//! these declarations so path shapes live in a single place.

use taskplan_console_macros::Endpoint;

// Param catalog.

#[Endpoint(id = "add_param", path = "/add_param", method = "POST", body = true, label = "create param")]
pub struct AddParam;

#[Endpoint(id = "add_param_batch", path = "/add_param_batch", method = "POST", body = true, label = "import params")]
pub struct AddParamBatch;

#[Endpoint(id = "edit_param", path = "/edit_param/{param}", method = "POST", body = true, label = "edit param")]
pub struct EditParam;

#[Endpoint(id = "reorder_param", path = "/reorder_param/{param}/{sorting}", label = "reorder param")]
pub struct ReorderParam;

#[Endpoint(id = "force_param", path = "/force_param/{param}/{enabled}", label = "force in name")]
pub struct ForceParam;

#[Endpoint(id = "add_param_value", path = "/add_param_value/{param}", method = "POST", body = true, label = "create value")]
pub struct AddParamValue;

#[Endpoint(
    id = "edit_param_value",
    path = "/edit_param_value/{param}/{value}",
    method = "POST",
    body = true,
    label = "edit value"
)]
pub struct EditParamValue;

// Task lifecycle.

#[Endpoint(id = "start", path = "/start/{iterations}", method = "POST", body = true, label = "start task")]
pub struct Start;

#[Endpoint(id = "test", path = "/test/{iterations}", method = "POST", body = true, label = "start test")]
pub struct StartTest;

#[Endpoint(id = "edit_task", path = "/edit_task/{task}/{iterations}", method = "POST", body = true, label = "edit task")]
pub struct EditTask;

#[Endpoint(id = "pause", path = "/pause/{task}")]
pub struct Pause;

#[Endpoint(id = "pause_all", path = "/pause_all/", label = "pause all")]
pub struct PauseAll;

#[Endpoint(id = "cancel", path = "/cancel/{task}")]
pub struct Cancel;

#[Endpoint(id = "finish", path = "/finish/{task}")]
pub struct Finish;

#[Endpoint(id = "terminate", path = "/terminate/{task}")]
pub struct Terminate;

#[Endpoint(id = "run_now", path = "/run_now/{task}", label = "run now")]
pub struct RunNow;

#[Endpoint(id = "save_now", path = "/save_now/{task}", label = "save now")]
pub struct SaveNow;

#[Endpoint(id = "clone_task", path = "/clone_task/{task}", label = "clone")]
pub struct CloneTask;

#[Endpoint(id = "create_checkpoint", path = "/create_checkpoint/{task}", label = "checkpoint")]
pub struct CreateCheckpoint;

#[Endpoint(id = "make_test_persistent", path = "/make_test_persistent/{task}", label = "make persistent")]
pub struct MakeTestPersistent;

#[Endpoint(id = "continue", path = "/continue/{task}/{device}/{iterations}")]
pub struct Continue;

#[Endpoint(id = "change", path = "/change/{task}/{iterations}", label = "change iterations")]
pub struct ChangeIterations;

#[Endpoint(id = "remove_task", path = "/remove_task/{task}", label = "remove")]
pub struct RemoveTask;

#[Endpoint(id = "reorder_task", path = "/reorder_task/{task}/{index}", label = "reorder task")]
pub struct ReorderTask;

#[Endpoint(id = "set_tags", path = "/set_tags/{task}", method = "POST", body = true, label = "set tags")]
pub struct SetTags;

#[Endpoint(id = "task_details", path = "/task_details/{task}", label = "load details")]
pub struct TaskDetails;

#[Endpoint(id = "log", path = "/log/{task}", label = "view log")]
pub struct Log;
